//! Domain models and strongly-typed identifiers.
//!
//! Defines the delivery record, its lifecycle states, and the newtype
//! identifier used to deduplicate redeliveries. Includes the database
//! serialization traits needed by the PostgreSQL ledger backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Caller-supplied delivery identifier.
///
/// The upstream system assigns one globally unique id per delivery and reuses
/// it on every redelivery, which makes it the idempotency key for the whole
/// pipeline. Wrapped in a newtype to prevent mixing with other strings.
///
/// # Example
///
/// ```
/// use inlet_core::models::DeliveryId;
/// let id = DeliveryId::new("dlv_01HZXW");
/// assert_eq!(id.as_str(), "dlv_01HZXW");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    /// Creates a delivery id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeliveryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeliveryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl sqlx::Type<PgDb> for DeliveryId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(raw))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Delivery lifecycle status.
///
/// State transitions are strictly controlled by the ledger:
///
/// ```text
/// pending --claim--> processing --success--> succeeded
///    ^                   |
///    |                   +-- failure, attempts < max --> pending
///    |                   +-- failure, attempts >= max -> dead_lettered
///    +---- replay ------------------------------------- dead_lettered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting to be claimed, either brand new or eligible for retry.
    Pending,

    /// A worker holds the claim and is executing the handler.
    ///
    /// Acts as the cross-process lock: a second redelivery observing this
    /// state short-circuits without re-running the handler.
    Processing,

    /// Handler and event emission completed. Terminal.
    Succeeded,

    /// Parked outside the retry path.
    ///
    /// The baseline state machine never rests here; the variant exists so
    /// operator tooling can take a record out of rotation without deleting
    /// its history.
    Failed,

    /// Retry budget exhausted or failure was permanent.
    ///
    /// Terminal until an operator replays or purges the record.
    DeadLettered,
}

impl DeliveryStatus {
    /// Whether the record can never transition again without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// One record per unique delivery attempt group.
///
/// All redeliveries carrying the same `delivery_id` reference this single
/// record; the ledger is the only writer once it exists.
///
/// # Invariants
///
/// - `attempt_count` only increases, incremented once per claim.
/// - A `succeeded` record never transitions again.
/// - `dead_lettered` is reached via the retry path only after
///   `attempt_count` reached the configured maximum, or immediately for
///   permanent failures such as an unknown event type.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    /// Caller-supplied idempotency key. Immutable.
    pub delivery_id: DeliveryId,

    /// Tag selecting the business-logic handler.
    pub event_type: String,

    /// Raw payload bytes, preserved verbatim for replay.
    ///
    /// The engine never interprets the payload; signature verification runs
    /// over these exact bytes and handlers parse them as they see fit.
    pub payload: Vec<u8>,

    /// MIME type the payload arrived with.
    pub content_type: String,

    /// Current lifecycle state.
    pub status: DeliveryStatus,

    /// Number of processing attempts so far.
    ///
    /// Incremented when the record is claimed, so a delivery that succeeds
    /// on its third attempt finishes with `attempt_count == 3`.
    pub attempt_count: i32,

    /// Most recent failure reason, cleared on success and replay.
    pub last_error: Option<String>,

    /// When the record was first created.
    pub created_at: DateTime<Utc>,

    /// When the record last changed state.
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Creates a fresh pending record from an accepted delivery.
    pub fn new(delivery: NewDelivery, now: DateTime<Utc>) -> Self {
        Self {
            delivery_id: delivery.delivery_id,
            event_type: delivery.event_type,
            payload: delivery.payload,
            content_type: delivery.content_type,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// An authenticated delivery about to enter the ledger.
///
/// Built by the ingestion layer after signature verification; unauthenticated
/// traffic never reaches the ledger.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    /// Caller-supplied idempotency key.
    pub delivery_id: DeliveryId,
    /// Tag selecting the handler.
    pub event_type: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// MIME type of the payload.
    pub content_type: String,
}
