//! Self-service terminal family
//!
//! The self-service dialect runs at 19200 baud. There is no cashier at the
//! terminal, so sale and day-close responses can carry the printable voucher
//! back to the integrating software, split into 40-column lines, and an
//! initialization handshake replaces some of the attended workflow.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::core::engine::{ConnectionEngine, EngineError};
use crate::core::events::{PortEvent, SubscriptionId};
use crate::core::profile::{CommandProfile, FrameClass, ResponseEnvelope};
use crate::core::response_codes::ResponseCodes;
use crate::core::transport::{PortInfo, TransportFactory};

use super::{
    fixed_digits, lookup_message, split_voucher, spawn_status_adapter, IntermediateStatus,
    LoadKeysResponse, SALE_DETAIL_RECORD, STATUS_FUNCTION_CODE,
};

/// Dialect of self-service terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoservicioProfile;

impl CommandProfile for AutoservicioProfile {
    fn name(&self) -> &'static str {
        "autoservicio"
    }

    fn default_baud_rate(&self) -> u32 {
        19_200
    }

    fn classify(&self, function_code: &str) -> FrameClass {
        match function_code {
            STATUS_FUNCTION_CODE | SALE_DETAIL_RECORD => FrameClass::Intermediate,
            _ => FrameClass::Final,
        }
    }
}

/// Response to a sale or last-sale query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleAutoservicioResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether the transaction was approved.
    pub successful: bool,
    /// Commerce code the transaction settled against.
    pub commerce_code: i64,
    /// Terminal identifier.
    pub terminal_id: String,
    /// Echoed ticket number.
    pub ticket: String,
    /// Authorization code; `None` when the terminal sent no such field.
    pub authorization_code: Option<String>,
    /// Transaction amount.
    pub amount: i64,
    /// Last four digits of the card, when present.
    pub last4_digits: Option<i64>,
    /// Terminal-assigned operation number.
    pub operation_number: String,
    /// Card type indicator.
    pub card_type: String,
    /// Accounting date of the transaction.
    pub accounting_date: String,
    /// Account number, masked by the terminal.
    pub account_number: String,
    /// Card brand.
    pub card_brand: String,
    /// Transaction date as reported by the terminal.
    pub real_date: String,
    /// Transaction time as reported by the terminal.
    pub real_time: String,
    /// Voucher print lines, when requested and present.
    pub voucher: Option<Vec<String>>,
    /// Installment type indicator.
    pub share_type: String,
    /// Number of installments.
    pub shares_number: String,
    /// Amount per installment.
    pub shares_amount: String,
    /// Free-text installment description.
    pub shares_type_comment: String,
}

/// Response to a refund request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundAutoservicioResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether the refund was approved.
    pub successful: bool,
    /// Commerce code the refund settled against.
    pub commerce_code: i64,
    /// Terminal identifier.
    pub terminal_id: String,
    /// Authorization code of the refund.
    pub authorization_code: String,
    /// Echoed operation identifier.
    pub operation_id: String,
}

/// Response to a day-close request, voucher included when requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseDayVoucherResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether the close was approved.
    pub successful: bool,
    /// Commerce code of the closed day.
    pub commerce_code: i64,
    /// Terminal identifier.
    pub terminal_id: String,
    /// Voucher print lines, when requested and present.
    pub voucher: Option<Vec<String>>,
}

/// Response to the initialization result query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether initialization succeeded.
    pub successful: bool,
    /// Date the terminal completed initialization.
    pub transaction_date: i64,
    /// Time the terminal completed initialization.
    pub transaction_time: String,
}

/// Client for self-service terminals.
pub struct PosAutoservicio {
    engine: ConnectionEngine,
    codes: ResponseCodes,
}

impl Default for PosAutoservicio {
    fn default() -> Self {
        Self::new()
    }
}

impl PosAutoservicio {
    /// Client with default configuration over real serial ports.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::with_baud_rate(
            AutoservicioProfile.default_baud_rate(),
        ))
    }

    /// Client with custom timeouts or baud rate.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            engine: ConnectionEngine::new(Arc::new(AutoservicioProfile), config),
            codes: ResponseCodes::default(),
        }
    }

    /// Client over a custom transport factory, for tests and non-serial
    /// lines.
    pub fn with_factory(config: EngineConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            engine: ConnectionEngine::with_factory(Arc::new(AutoservicioProfile), config, factory),
            codes: ResponseCodes::default(),
        }
    }

    /// Replace the response code table.
    #[must_use]
    pub fn with_response_codes(mut self, codes: ResponseCodes) -> Self {
        self.codes = codes;
        self
    }

    /// The underlying engine.
    pub fn engine(&self) -> &ConnectionEngine {
        &self.engine
    }

    /// Connect on the configured baud rate.
    pub async fn connect(&self, port: &str) -> Result<(), EngineError> {
        self.engine.connect(port, self.engine.config().baud_rate).await
    }

    /// Probe enumerated ports for a responsive terminal.
    pub async fn autoconnect(&self) -> Result<Option<PortInfo>, EngineError> {
        self.engine.autoconnect(self.engine.config().baud_rate).await
    }

    /// Tear down the session.
    pub async fn disconnect(&self) -> Result<bool, EngineError> {
        self.engine.disconnect().await
    }

    /// Whether a session is established.
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Port of the current session, if any.
    pub fn connected_port(&self) -> Option<String> {
        self.engine.connected_port()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<PortEvent>) {
        self.engine.subscribe_events()
    }

    /// Remove a lifecycle event subscription.
    pub fn unsubscribe_events(&self, id: SubscriptionId) {
        self.engine.unsubscribe_events(id)
    }

    /// Check the terminal is still listening.
    pub async fn poll(&self) -> Result<(), EngineError> {
        self.engine.send_no_response("0100").await
    }

    /// Ask the terminal to fetch fresh working keys from the authorizer.
    pub async fn load_keys(&self) -> Result<LoadKeysResponse, EngineError> {
        let envelope = self.engine.send("0800").await?;
        Ok(LoadKeysResponse::decode(&envelope, &self.codes))
    }

    /// Run a sale for `amount`, tagged with the caller's `ticket` number.
    ///
    /// With `send_voucher` the response carries the printable voucher; with
    /// `send_status` the terminal pushes progress frames, observable through
    /// the optional channel.
    pub async fn sale(
        &self,
        amount: u64,
        ticket: u64,
        send_status: bool,
        send_voucher: bool,
        status: Option<mpsc::UnboundedSender<IntermediateStatus>>,
    ) -> Result<SaleAutoservicioResponse, EngineError> {
        let payload = sale_payload(amount, ticket, send_status, send_voucher);
        let envelope = match status {
            Some(status) => {
                let adapter = spawn_status_adapter(self.codes.clone(), status);
                self.engine.send_with_status(&payload, Some(&adapter)).await?
            }
            None => self.engine.send(&payload).await?,
        };
        Ok(decode_sale(&envelope, &self.codes))
    }

    /// Fetch the last transaction the terminal processed.
    pub async fn get_last_sale(
        &self,
        send_voucher: bool,
    ) -> Result<SaleAutoservicioResponse, EngineError> {
        let voucher = if send_voucher { '1' } else { '0' };
        let envelope = self.engine.send(&format!("0250|{voucher}")).await?;
        Ok(decode_sale(&envelope, &self.codes))
    }

    /// Refund the last transaction. The terminal picks the transaction; no
    /// operation identifier travels on the wire.
    pub async fn refund(&self) -> Result<RefundAutoservicioResponse, EngineError> {
        let envelope = self.engine.send("1200").await?;
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Ok(RefundAutoservicioResponse {
            function_code: fields.int(0),
            response_code,
            response_message: lookup_message(&self.codes, response_code),
            successful: ResponseCodes::is_approved(response_code),
            commerce_code: fields.int(2),
            terminal_id: fields.text(3),
            authorization_code: fields.trimmed(4),
            operation_id: fields.text(5),
        })
    }

    /// Close the day, settling accumulated transactions.
    pub async fn close_day(
        &self,
        send_voucher: bool,
    ) -> Result<CloseDayVoucherResponse, EngineError> {
        let voucher = if send_voucher { '1' } else { '0' };
        let envelope = self.engine.send(&format!("0500|{voucher}")).await?;
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Ok(CloseDayVoucherResponse {
            function_code: fields.int(0),
            response_code,
            response_message: lookup_message(&self.codes, response_code),
            successful: ResponseCodes::is_approved(response_code),
            commerce_code: fields.int(2),
            terminal_id: fields.text(3),
            voucher: split_voucher(&fields, 4),
        })
    }

    /// Start terminal initialization. The terminal only acknowledges; query
    /// the outcome afterwards with
    /// [`initialization_response`](Self::initialization_response).
    pub async fn initialization(&self) -> Result<(), EngineError> {
        self.engine.send_no_response("0070").await
    }

    /// Query the result of the last initialization.
    pub async fn initialization_response(&self) -> Result<InitializationResponse, EngineError> {
        let envelope = self.engine.send("0080").await?;
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Ok(InitializationResponse {
            function_code: fields.int(0),
            response_code,
            response_message: lookup_message(&self.codes, response_code),
            successful: ResponseCodes::is_approved(response_code),
            transaction_date: fields.int(2),
            transaction_time: fields.text(3),
        })
    }
}

fn sale_payload(amount: u64, ticket: u64, send_status: bool, send_voucher: bool) -> String {
    let status = if send_status { '1' } else { '0' };
    let voucher = if send_voucher { '1' } else { '0' };
    format!(
        "0200|{}|{}|{}|{}",
        fixed_digits(amount, 9),
        fixed_digits(ticket, 6),
        voucher,
        status
    )
}

fn decode_sale(envelope: &ResponseEnvelope, codes: &ResponseCodes) -> SaleAutoservicioResponse {
    let fields = envelope.fields();
    let response_code = fields.int(1);
    SaleAutoservicioResponse {
        function_code: fields.int(0),
        response_code,
        response_message: lookup_message(codes, response_code),
        successful: ResponseCodes::is_approved(response_code),
        commerce_code: fields.int(2),
        terminal_id: fields.text(3),
        ticket: fields.text(4),
        authorization_code: fields.text_opt(5).map(|code| code.trim().to_string()),
        amount: fields.int(6),
        last4_digits: fields.int_opt(7),
        operation_number: fields.text(8),
        card_type: fields.text(9),
        accounting_date: fields.text(10),
        account_number: fields.text(11),
        card_brand: fields.text(12),
        real_date: fields.text(13),
        real_time: fields.text(14),
        voucher: split_voucher(&fields, 15),
        share_type: fields.text(16),
        shares_number: fields.text(17),
        shares_amount: fields.text(18),
        shares_type_comment: fields.text(19),
    }
}
