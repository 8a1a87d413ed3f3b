//! Response code to message lookup
//!
//! Terminals answer with a numeric response code in the second positional
//! field; this table maps the known codes to human-readable messages. Code 0
//! always means approved. Unknown codes look up to `None` rather than
//! failing, and integrators may extend or replace entries for firmware that
//! speaks additional codes.

use std::collections::HashMap;

/// Numeric response code lookup table.
#[derive(Debug, Clone)]
pub struct ResponseCodes {
    table: HashMap<i64, String>,
}

impl ResponseCodes {
    /// Empty table; every lookup returns `None`.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Add or replace one code's message.
    #[must_use]
    pub fn with_message(mut self, code: i64, message: &str) -> Self {
        self.table.insert(code, message.to_string());
        self
    }

    /// Message for a code, when known.
    pub fn message(&self, code: i64) -> Option<&str> {
        self.table.get(&code).map(String::as_str)
    }

    /// Whether a code denotes an approved operation.
    pub fn is_approved(code: i64) -> bool {
        code == 0
    }
}

impl Default for ResponseCodes {
    fn default() -> Self {
        let entries: &[(i64, &str)] = &[
            (0, "Approved"),
            (1, "Rejected"),
            (2, "Authorizer not responding"),
            (3, "Connection error"),
            (4, "Transaction already reversed"),
            (5, "No transaction to reverse"),
            (6, "Card not supported"),
            (7, "Transaction cancelled on the terminal"),
            (8, "Debit transactions cannot be reversed"),
            (9, "Card read error"),
            (10, "Amount below the allowed minimum"),
            (11, "No sales registered"),
            (12, "Transaction not supported"),
            (13, "Day close required"),
            (14, "Printer out of paper"),
            (15, "Operation in progress"),
        ];
        Self {
            table: entries
                .iter()
                .map(|&(code, message)| (code, message.to_string()))
                .collect(),
        }
    }
}
