use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use ofl_common::Amount;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::online::OnlineTransaction;

#[derive(Debug, Clone, Error)]
#[error("Invalid {0}: {1}")]
pub struct ConversionError(pub &'static str, pub String);

//--------------------------------------       OrderId        --------------------------------------------------------
/// The public order number, as shown to customers and admins. The storage
/// layer keys rows by an internal integer id; everything above it uses this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------     OrderStatus      --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// The order exists but has not been confirmed by the customer yet.
    Draft,
    /// The customer has confirmed the order.
    Confirmed,
    /// The warehouse has picked and packed the order.
    Assembled,
    /// The order has been handed to the transport company.
    Shipped,
    /// The transport company has delivered the order.
    Delivered,
    /// The order is closed. Requires full payment.
    Completed,
    /// The order was cancelled by the customer or an admin.
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Assembled => "assembled",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "confirmed" => Ok(Self::Confirmed),
            "assembled" => Ok(Self::Assembled),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError("order status", s.to_string())),
        }
    }
}

//--------------------------------------   DeliveryMethod     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMethod {
    TransportCompany,
    SelfPickup,
}

impl Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryMethod::TransportCompany => "transport-company",
            DeliveryMethod::SelfPickup => "self-pickup",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DeliveryMethod {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport-company" => Ok(Self::TransportCompany),
            "self-pickup" => Ok(Self::SelfPickup),
            s => Err(ConversionError("delivery method", s.to_string())),
        }
    }
}

//--------------------------------------   FinancialState     --------------------------------------------------------
/// The derived summary of an order's payment position. Never hand-set: the
/// stored value is always the output of [`crate::financials::compute_financials`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinancialState {
    Unpaid,
    PartiallyPaid,
    Paid,
    Overpaid,
    RefundPending,
    Refunded,
}

impl Display for FinancialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinancialState::Unpaid => "unpaid",
            FinancialState::PartiallyPaid => "partially-paid",
            FinancialState::Paid => "paid",
            FinancialState::Overpaid => "overpaid",
            FinancialState::RefundPending => "refund-pending",
            FinancialState::Refunded => "refunded",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FinancialState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(Self::Unpaid),
            "partially-paid" => Ok(Self::PartiallyPaid),
            "paid" => Ok(Self::Paid),
            "overpaid" => Ok(Self::Overpaid),
            "refund-pending" => Ok(Self::RefundPending),
            "refunded" => Ok(Self::Refunded),
            s => Err(ConversionError("financial state", s.to_string())),
        }
    }
}

//--------------------------------------      EventKind       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Payment,
    Refund,
}

impl EventKind {
    /// The contribution of an event of this kind to the net amount paid.
    pub fn signed(&self, amount: Amount) -> Amount {
        match self {
            EventKind::Payment => amount,
            EventKind::Refund => -amount,
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Payment => write!(f, "payment"),
            EventKind::Refund => write!(f, "refund"),
        }
    }
}

impl FromStr for EventKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Self::Payment),
            "refund" => Ok(Self::Refund),
            s => Err(ConversionError("event kind", s.to_string())),
        }
    }
}

//--------------------------------------    PaymentMethod     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    CardOnline,
    CardOffline,
    Cash,
    BankTransfer,
    CashOnReceipt,
}

impl PaymentMethod {
    /// Methods with an external transaction reference must carry it, since it
    /// doubles as the ledger's idempotency key.
    pub fn requires_transaction_id(&self) -> bool {
        matches!(self, PaymentMethod::CardOnline | PaymentMethod::CardOffline | PaymentMethod::BankTransfer)
    }

    /// Cash at the till or on receipt can legitimately exceed the order
    /// total (change is handled outside the ledger); card and bank payments
    /// cannot.
    pub fn allows_overpayment(&self) -> bool {
        matches!(self, PaymentMethod::Cash | PaymentMethod::CashOnReceipt)
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentMethod::CardOnline => "card-online",
            PaymentMethod::CardOffline => "card-offline",
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank-transfer",
            PaymentMethod::CashOnReceipt => "cash-on-receipt",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PaymentMethod {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card-online" => Ok(Self::CardOnline),
            "card-offline" => Ok(Self::CardOffline),
            "cash" => Ok(Self::Cash),
            "bank-transfer" => Ok(Self::BankTransfer),
            "cash-on-receipt" => Ok(Self::CashOnReceipt),
            s => Err(ConversionError("payment method", s.to_string())),
        }
    }
}

//--------------------------------------     ProviderTag      --------------------------------------------------------
/// The payment integrations this deployment knows about. A typed tag rather
/// than a free-form string: an unknown provider is a parse error at the
/// boundary, not a runtime lookup failure deep in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    Yookassa,
    CloudPayments,
}

impl Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderTag::Yookassa => write!(f, "yookassa"),
            ProviderTag::CloudPayments => write!(f, "cloudpayments"),
        }
    }
}

impl FromStr for ProviderTag {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yookassa" => Ok(Self::Yookassa),
            "cloudpayments" => Ok(Self::CloudPayments),
            s => Err(ConversionError("provider", s.to_string())),
        }
    }
}

//--------------------------------------        Actor         --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Manager,
    System,
}

impl Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Customer => write!(f, "customer"),
            ActorRole::Manager => write!(f, "manager"),
            ActorRole::System => write!(f, "system"),
        }
    }
}

impl FromStr for ActorRole {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "manager" => Ok(Self::Manager),
            "system" => Ok(Self::System),
            s => Err(ConversionError("actor role", s.to_string())),
        }
    }
}

/// Who caused a ledger entry: a customer checkout, an admin, or one of the
/// automated flows (webhook delivery, reconciliation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new<S: Into<String>>(name: S, role: ActorRole) -> Self {
        Self { name: name.into(), role }
    }

    pub fn system<S: Into<String>>(name: S) -> Self {
        Self::new(name, ActorRole::System)
    }
}

//--------------------------------------   FinancialEvent     --------------------------------------------------------
/// One payment or refund in an order's ledger. Immutable once created; the
/// only permitted change is setting the void flag, which excludes the entry
/// from all aggregates while keeping it in the history for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderTag>,
    pub amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_payment_id: Option<String>,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
    pub voided: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voided_note: Option<String>,
}

impl FinancialEvent {
    /// This event's contribution to the net amount paid, zero if voided.
    pub fn net_contribution(&self) -> Amount {
        if self.voided {
            Amount::ZERO
        } else {
            self.kind.signed(self.amount)
        }
    }
}

//-------------------------------------- NewFinancialEvent    --------------------------------------------------------
/// A ledger entry as presented to the applier, before it has been assigned
/// an id and a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFinancialEvent {
    pub order_id: OrderId,
    pub kind: EventKind,
    pub method: PaymentMethod,
    pub provider: Option<ProviderTag>,
    pub amount: Amount,
    pub transaction_id: Option<String>,
    pub original_payment_id: Option<String>,
    pub actor: Actor,
}

impl NewFinancialEvent {
    pub fn payment(order_id: OrderId, method: PaymentMethod, amount: Amount, actor: Actor) -> Self {
        Self {
            order_id,
            kind: EventKind::Payment,
            method,
            provider: None,
            amount,
            transaction_id: None,
            original_payment_id: None,
            actor,
        }
    }

    pub fn refund(order_id: OrderId, method: PaymentMethod, amount: Amount, actor: Actor) -> Self {
        Self { kind: EventKind::Refund, ..Self::payment(order_id, method, amount, actor) }
    }

    pub fn with_provider(mut self, provider: ProviderTag) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_transaction_id<S: Into<String>>(mut self, txid: S) -> Self {
        self.transaction_id = Some(txid.into());
        self
    }

    pub fn with_original_payment<S: Into<String>>(mut self, payment_id: S) -> Self {
        self.original_payment_id = Some(payment_id.into());
        self
    }
}

//-------------------------------------- StatusHistoryEntry   --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub status: OrderStatus,
    pub changed_at: DateTime<Utc>,
    /// On cancellation, the last non-cancelled status: how far the order had
    /// gotten before it was called off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_status: Option<OrderStatus>,
}

//--------------------------------------        Order         --------------------------------------------------------
/// The order aggregate as loaded from storage. The event history and status
/// history live in their own tables and are fetched on demand; the aggregate
/// carries the derived financial fields, which are recomputed on every
/// ledger mutation.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub customer_id: String,
    pub total_amount: Amount,
    pub delivery_method: DeliveryMethod,
    pub status: OrderStatus,
    pub financial_state: FinancialState,
    pub total_paid: Amount,
    pub total_refunded: Amount,
    pub current_online_tx: Option<OnlineTransaction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn net_paid(&self) -> Amount {
        self.total_paid - self.total_refunded
    }
}

//--------------------------------------      NewOrder        --------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub customer_id: String,
    pub total_amount: Amount,
    pub delivery_method: DeliveryMethod,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new(order_id: OrderId, customer_id: String, total_amount: Amount, delivery_method: DeliveryMethod) -> Self {
        Self { order_id, customer_id, total_amount, delivery_method, created_at: Utc::now() }
    }
}

//--------------------------------------   CriticalEvent      --------------------------------------------------------
/// Why a critical event was raised. These are anomalies that need a human:
/// they are persisted, never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CriticalReason {
    /// A stuck online transaction was found on an order that has reverted to
    /// draft. That combination should be impossible and points at data
    /// corruption.
    StuckTransactionOnDraftOrder,
    /// A finished gateway transaction could not be normalized because it is
    /// missing mandatory fields.
    MalformedExternalTransaction,
}

impl Display for CriticalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CriticalReason::StuckTransactionOnDraftOrder => "stuck-transaction-on-draft-order",
            CriticalReason::MalformedExternalTransaction => "malformed-external-transaction",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CriticalReason {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stuck-transaction-on-draft-order" => Ok(Self::StuckTransactionOnDraftOrder),
            "malformed-external-transaction" => Ok(Self::MalformedExternalTransaction),
            s => Err(ConversionError("critical event reason", s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CriticalEvent {
    pub id: i64,
    pub order_id: Option<OrderId>,
    pub reason: CriticalReason,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCriticalEvent {
    pub order_id: Option<OrderId>,
    pub reason: CriticalReason,
    pub details: serde_json::Value,
}

impl NewCriticalEvent {
    pub fn new(order_id: Option<OrderId>, reason: CriticalReason, details: serde_json::Value) -> Self {
        Self { order_id, reason, details }
    }
}
