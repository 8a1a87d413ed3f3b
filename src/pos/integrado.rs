//! Attended terminal family
//!
//! The attended dialect runs at 115200 baud and covers the full counter
//! workflow: sales (single and multi-commerce), refunds, day close, totals,
//! and the per-sale detail listing. Sale transactions optionally push
//! intermediate status frames (`0900`) while the cardholder interacts with
//! the device; the detail listing streams one `0261` record per sale.

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
    fixed_digits, lookup_message, spawn_status_adapter, IntermediateStatus, LoadKeysResponse,
    SALE_DETAIL_RECORD, STATUS_FUNCTION_CODE,
};

/// Function code answering a multi-commerce sale.
const MULTICODE_SALE_RESPONSE: &str = "0271";

/// Dialect of attended terminals.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegradoProfile;

impl CommandProfile for IntegradoProfile {
    fn name(&self) -> &'static str {
        "integrado"
    }

    fn default_baud_rate(&self) -> u32 {
        115_200
    }

    fn classify(&self, function_code: &str) -> FrameClass {
        match function_code {
            STATUS_FUNCTION_CODE | SALE_DETAIL_RECORD => FrameClass::Intermediate,
            _ => FrameClass::Final,
        }
    }
}

/// Response to a sale, multi-commerce sale, or last-sale query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleResponse {
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
    /// Number of installments.
    pub shares_number: String,
    /// Amount per installment.
    pub shares_amount: String,
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
    /// Employee identifier entered on the terminal.
    pub employee_id: String,
    /// Tip amount, when present.
    pub tip: Option<i64>,
    /// Change amount; only present in multi-commerce sale responses.
    pub change: Option<String>,
}

/// One record from the sales detail stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDetailResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether the recorded transaction was approved.
    pub successful: bool,
    /// Commerce code the transaction settled against.
    pub commerce_code: i64,
    /// Terminal identifier.
    pub terminal_id: String,
    /// Ticket number of the recorded sale.
    pub ticket: String,
    /// Authorization code; `None` when the terminal sent no such field.
    pub authorization_code: Option<String>,
    /// Transaction amount, as sent on the wire.
    pub amount: String,
    /// Last four digits of the card.
    pub last4_digits: i64,
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
    /// Employee identifier entered on the terminal.
    pub employee_id: String,
    /// Tip amount.
    pub tip: i64,
    /// Fee amount column; shares its wire position with the tip.
    pub fee_amount: String,
    /// Fee number column.
    pub fee_number: String,
}

/// Response to a refund request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResponse {
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

/// Response to a day-close request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseDayResponse {
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
}

/// Response to a totals query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsResponse {
    /// Echoed function code.
    pub function_code: i64,
    /// Numeric result; zero means approved.
    pub response_code: i64,
    /// Message for the response code, when known.
    pub response_message: Option<String>,
    /// Whether the query was approved.
    pub successful: bool,
    /// Number of transactions since the last close.
    pub tx_count: i64,
    /// Accumulated amount since the last close.
    pub tx_total: i64,
}

/// Client for attended terminals.
pub struct PosIntegrado {
    engine: ConnectionEngine,
    codes: ResponseCodes,
}

impl Default for PosIntegrado {
    fn default() -> Self {
        Self::new()
    }
}

impl PosIntegrado {
    /// Client with default configuration over real serial ports.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::with_baud_rate(
            IntegradoProfile.default_baud_rate(),
        ))
    }

    /// Client with custom timeouts or baud rate.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            engine: ConnectionEngine::new(Arc::new(IntegradoProfile), config),
            codes: ResponseCodes::default(),
        }
    }

    /// Client over a custom transport factory, for tests and non-serial
    /// lines.
    pub fn with_factory(config: EngineConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            engine: ConnectionEngine::with_factory(Arc::new(IntegradoProfile), config, factory),
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
    /// With `send_status`, the terminal pushes progress frames while the
    /// cardholder interacts with it; supply a channel to observe them.
    pub async fn sale(
        &self,
        amount: u64,
        ticket: u64,
        send_status: bool,
        status: Option<mpsc::UnboundedSender<IntermediateStatus>>,
    ) -> Result<SaleResponse, EngineError> {
        let payload = sale_payload(amount, ticket, send_status);
        let envelope = self.send_with_optional_status(&payload, status).await?;
        Ok(decode_sale(&envelope, &self.codes))
    }

    /// Run a sale against a specific commerce code on a multi-commerce
    /// terminal. `None` lets the terminal prompt for the commerce.
    pub async fn multicode_sale(
        &self,
        amount: u64,
        ticket: u64,
        commerce_code: Option<u64>,
        send_status: bool,
        status: Option<mpsc::UnboundedSender<IntermediateStatus>>,
    ) -> Result<SaleResponse, EngineError> {
        let payload = multicode_sale_payload(amount, ticket, commerce_code, send_status);
        let envelope = self.send_with_optional_status(&payload, status).await?;
        Ok(decode_sale(&envelope, &self.codes))
    }

    /// Fetch the last transaction the terminal processed.
    pub async fn get_last_sale(&self) -> Result<SaleResponse, EngineError> {
        let envelope = self.engine.send("0250|").await?;
        Ok(decode_sale(&envelope, &self.codes))
    }

    /// Refund the transaction identified by `operation_id` (at most six
    /// characters are sent).
    pub async fn refund(&self, operation_id: &str) -> Result<RefundResponse, EngineError> {
        if operation_id.is_empty() {
            return Err(EngineError::InvalidArgument(
                "operation id must not be empty",
            ));
        }
        let truncated: String = operation_id.chars().take(6).collect();
        let envelope = self.engine.send(&format!("1200|{truncated}|")).await?;
        Ok(decode_refund(&envelope, &self.codes))
    }

    /// Close the day, settling accumulated transactions.
    pub async fn close_day(&self) -> Result<CloseDayResponse, EngineError> {
        let envelope = self.engine.send("0500||").await?;
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Ok(CloseDayResponse {
            function_code: fields.int(0),
            response_code,
            response_message: lookup_message(&self.codes, response_code),
            successful: ResponseCodes::is_approved(response_code),
            commerce_code: fields.int(2),
            terminal_id: fields.text(3),
        })
    }

    /// Query transaction count and total since the last close.
    pub async fn get_totals(&self) -> Result<TotalsResponse, EngineError> {
        let envelope = self.engine.send("0700||").await?;
        let fields = envelope.fields();
        let response_code = fields.int(1);
        Ok(TotalsResponse {
            function_code: fields.int(0),
            response_code,
            response_message: lookup_message(&self.codes, response_code),
            successful: ResponseCodes::is_approved(response_code),
            tx_count: fields.int(2),
            tx_total: fields.int(3),
        })
    }

    /// List the sales since the last close.
    ///
    /// With `print_on_pos` the terminal prints the listing itself and sends
    /// nothing back, so the result is empty. Otherwise the terminal streams
    /// one record per sale; the stream ends at a record whose authorization
    /// code is blank, which is not included in the result.
    pub async fn sales_detail(
        &self,
        print_on_pos: bool,
    ) -> Result<Vec<SaleDetailResponse>, EngineError> {
        // On the wire '0' means the terminal prints, '1' means it streams.
        let print = if print_on_pos { '0' } else { '1' };
        let payload = format!("0260|{print}|");

        if print_on_pos {
            self.engine.send_no_response(&payload).await?;
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ResponseEnvelope>();
        let exchange = self.engine.send_with_status(&payload, Some(&tx));
        tokio::pin!(exchange);

        let mut sales = Vec::new();
        loop {
            tokio::select! {
                record = rx.recv() => match record {
                    Some(envelope) => {
                        let detail = decode_sale_detail(&envelope, &self.codes);
                        match &detail.authorization_code {
                            // The terminator record carries no authorization
                            // code; dropping the exchange here releases the
                            // request slot.
                            Some(code) if !code.is_empty() => sales.push(detail),
                            _ => return Ok(sales),
                        }
                    }
                    None => return Ok(sales),
                },
                result = &mut exchange => {
                    // The terminal answered with a final frame (or the
                    // exchange failed) before the terminator record.
                    result?;
                    return Ok(sales);
                }
            }
        }
    }

    /// Return the terminal to its normal standalone mode. The terminal only
    /// acknowledges; the serial session is unusable afterwards.
    pub async fn change_to_normal_mode(&self) -> Result<(), EngineError> {
        self.engine.send_no_response("0300").await
    }

    async fn send_with_optional_status(
        &self,
        payload: &str,
        status: Option<mpsc::UnboundedSender<IntermediateStatus>>,
    ) -> Result<ResponseEnvelope, EngineError> {
        match status {
            Some(status) => {
                let adapter = spawn_status_adapter(self.codes.clone(), status);
                self.engine.send_with_status(payload, Some(&adapter)).await
            }
            None => self.engine.send(payload).await,
        }
    }
}

fn sale_payload(amount: u64, ticket: u64, send_status: bool) -> String {
    let status = if send_status { '1' } else { '0' };
    format!(
        "0200|{}|{}|||{}",
        fixed_digits(amount, 9),
        fixed_digits(ticket, 6),
        status
    )
}

fn multicode_sale_payload(
    amount: u64,
    ticket: u64,
    commerce_code: Option<u64>,
    send_status: bool,
) -> String {
    let status = if send_status { '1' } else { '0' };
    let commerce = commerce_code.map_or_else(|| "0".to_string(), |code| code.to_string());
    format!(
        "0270|{}|{}|||{}|{}",
        fixed_digits(amount, 9),
        fixed_digits(ticket, 6),
        status,
        commerce
    )
}

fn decode_sale(envelope: &ResponseEnvelope, codes: &ResponseCodes) -> SaleResponse {
    let fields = envelope.fields();
    let response_code = fields.int(1);
    let mut response = SaleResponse {
        function_code: fields.int(0),
        response_code,
        response_message: lookup_message(codes, response_code),
        successful: ResponseCodes::is_approved(response_code),
        commerce_code: fields.int(2),
        terminal_id: fields.text(3),
        ticket: fields.text(4),
        authorization_code: fields.text_opt(5).map(|code| code.trim().to_string()),
        amount: fields.int(6),
        shares_number: fields.text(7),
        shares_amount: fields.text(8),
        last4_digits: fields.int_opt(9),
        operation_number: fields.text(10),
        card_type: fields.text(11),
        accounting_date: fields.text(12),
        account_number: fields.text(13),
        card_brand: fields.text(14),
        real_date: fields.text(15),
        real_time: fields.text(16),
        employee_id: fields.text(17),
        tip: fields.int_opt(18),
        change: None,
    };
    if envelope.function_code == MULTICODE_SALE_RESPONSE {
        response.change = Some(fields.text(20));
        response.commerce_code = fields.int(21);
    }
    response
}

fn decode_sale_detail(envelope: &ResponseEnvelope, codes: &ResponseCodes) -> SaleDetailResponse {
    let fields = envelope.fields();
    let response_code = fields.int(1);
    SaleDetailResponse {
        function_code: fields.int(0),
        response_code,
        response_message: lookup_message(codes, response_code),
        successful: ResponseCodes::is_approved(response_code),
        commerce_code: fields.int(2),
        terminal_id: fields.text(3),
        ticket: fields.text(4),
        authorization_code: fields.text_opt(5).map(|code| code.trim().to_string()),
        amount: fields.text(6),
        last4_digits: fields.int(7),
        operation_number: fields.text(8),
        card_type: fields.text(9),
        accounting_date: fields.text(10),
        account_number: fields.text(11),
        card_brand: fields.text(12),
        real_date: fields.text(13),
        real_time: fields.text(14),
        employee_id: fields.text(15),
        tip: fields.int(16),
        fee_amount: fields.text(16),
        fee_number: fields.text(17),
    }
}

fn decode_refund(envelope: &ResponseEnvelope, codes: &ResponseCodes) -> RefundResponse {
    let fields = envelope.fields();
    let response_code = fields.int(1);
    RefundResponse {
        function_code: fields.int(0),
        response_code,
        response_message: lookup_message(codes, response_code),
        successful: ResponseCodes::is_approved(response_code),
        commerce_code: fields.int(2),
        terminal_id: fields.text(3),
        authorization_code: fields.trimmed(4),
        operation_id: fields.text(5),
    }
}
