//! Terminal command families
//!
//! Two dialects share the engine: [`PosIntegrado`] for attended terminals
//! and [`PosAutoservicio`] for self-service kiosks. Both encode requests as
//! pipe-delimited positional payloads and decode positional responses; the
//! layouts differ enough that each family owns its own decoders.

pub mod autoservicio;
pub mod integrado;

pub use autoservicio::{
    AutoservicioProfile, CloseDayVoucherResponse, InitializationResponse, PosAutoservicio,
    RefundAutoservicioResponse, SaleAutoservicioResponse,
};
pub use integrado::{
    CloseDayResponse, IntegradoProfile, PosIntegrado, RefundResponse, SaleDetailResponse,
    SaleResponse, TotalsResponse,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::profile::{Fields, ResponseEnvelope};
use crate::core::response_codes::ResponseCodes;

/// Function code of intermediate sale status frames.
pub(crate) const STATUS_FUNCTION_CODE: &str = "0900";

/// Function code of streamed sale detail records.
pub(crate) const SALE_DETAIL_RECORD: &str = "0261";

/// Progress report pushed by the terminal mid-transaction: card inserted,
/// PIN entry, authorizer contacted, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateStatus {
    /// Status code from the terminal.
    pub response_code: i64,
    /// Message for the code, when known.
    pub response_message: Option<String>,
}

impl IntermediateStatus {
    pub(crate) fn decode(envelope: &ResponseEnvelope, codes: &ResponseCodes) -> Self {
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Self {
            response_code,
            response_message: lookup_message(codes, response_code),
        }
    }
}

/// Response to the key-loading command, shared by both families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadKeysResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether the operation was approved.
    pub successful: bool,
    /// Commerce code registered on the terminal.
    pub commerce_code: i64,
    /// Terminal identifier.
    pub terminal_id: String,
}

impl LoadKeysResponse {
    pub(crate) fn decode(envelope: &ResponseEnvelope, codes: &ResponseCodes) -> Self {
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Self {
            function_code: fields.int(0),
            response_code,
            response_message: lookup_message(codes, response_code),
            successful: ResponseCodes::is_approved(response_code),
            commerce_code: fields.int(2),
            terminal_id: fields.text(3),
        }
    }
}

pub(crate) fn lookup_message(codes: &ResponseCodes, code: i64) -> Option<String> {
    codes.message(code).map(str::to_string)
}

/// Render a numeric value as exactly `width` digits: shorter values are
/// zero-padded on the left, longer ones keep their leading digits. The wire
/// format has no room for variable-width amounts.
pub(crate) fn fixed_digits(value: u64, width: usize) -> String {
    let mut digits = format!("{value:0>width$}");
    digits.truncate(width);
    digits
}

/// Split a voucher field into its 40-column print lines. Blank or absent
/// fields carry no voucher.
pub(crate) fn split_voucher(fields: &Fields<'_>, index: usize) -> Option<Vec<String>> {
    let text = fields.text_opt(index)?;
    if text.is_empty() {
        return None;
    }
    let lines = text
        .as_bytes()
        .chunks(40)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect();
    Some(lines)
}

/// Bridge the engine's envelope channel to a caller-facing status channel,
/// decoding each intermediate frame on the way through.
pub(crate) fn spawn_status_adapter(
    codes: ResponseCodes,
    status: mpsc::UnboundedSender<IntermediateStatus>,
) -> mpsc::UnboundedSender<ResponseEnvelope> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ResponseEnvelope>();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if status
                .send(IntermediateStatus::decode(&envelope, &codes))
                .is_err()
            {
                break;
            }
        }
    });
    tx
}
