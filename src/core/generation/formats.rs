//! Response format catalog.

use serde::Serialize;

/// A named output style the user can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponseFormat {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const RESPONSE_FORMATS: &[ResponseFormat] = &[
    ResponseFormat {
        id: "EO",
        name: "Email Outline",
        description: "Full detailed outline with email response.",
    },
    ResponseFormat {
        id: "CL",
        name: "CHAT/RAC notes",
        description: "Simplified outline for quick internal review.",
    },
    ResponseFormat {
        id: "INV",
        name: "Investigation Notes",
        description: "Checklist for internal case documentation.",
    },
    ResponseFormat {
        id: "QS",
        name: "Quick Summary",
        description: "Brief executive summary of the case.",
    },
    ResponseFormat {
        id: "CF",
        name: "Consult Form",
        description: "Formatted for consultation with other teams.",
    },
    ResponseFormat {
        id: "EM",
        name: "Empathy Statement",
        description: "Generate a short, empathetic phrase.",
    },
    ResponseFormat {
        id: "ACK",
        name: "Acknowledgement",
        description: "A short, empathetic reply to acknowledge a user's message.",
    },
];

/// Case-insensitive catalog lookup
pub fn find_format(id: &str) -> Option<&'static ResponseFormat> {
    let id = id.trim();
    RESPONSE_FORMATS
        .iter()
        .find(|f| f.id.eq_ignore_ascii_case(id))
}

pub fn default_format_ids() -> Vec<String> {
    vec![RESPONSE_FORMATS[0].id.to_string()]
}
