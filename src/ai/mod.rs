pub mod executor;
pub mod gemini;
pub mod narrator;
pub mod plan;
pub mod router;

use serde::{Deserialize, Serialize};

/// Reply language for the chat feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    #[default]
    Es,
}

impl Lang {
    /// Anything other than an English tag answers in Spanish.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()) {
            Some(tag) if tag == "en" || tag.starts_with("en-") => Self::En,
            _ => Self::Es,
        }
    }

    pub fn no_data(self) -> &'static str {
        match self {
            Self::Es => "No se encontraron datos para tu consulta. Intenta ajustar los filtros o hacer una pregunta más general.",
            Self::En => "No data found for your query. Try adjusting the filters or asking a more general question.",
        }
    }

    pub fn processing_error(self) -> &'static str {
        match self {
            Self::Es => "Hubo un error procesando tu pregunta. Inténtalo de nuevo.",
            Self::En => "There was an error processing your question. Please try again.",
        }
    }

    pub fn exporter_not_found(self, term: &str) -> String {
        match self {
            Self::Es => format!("No se encontró ningún exportador con el nombre \"{term}\""),
            Self::En => format!("No exporter found matching \"{term}\""),
        }
    }

    pub fn no_shipments(self, term: &str) -> String {
        match self {
            Self::Es => format!("No se encontraron datos de exportación para \"{term}\""),
            Self::En => format!("No export data found for \"{term}\""),
        }
    }
}
