use serde::{Deserialize, Deserializer, de};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::wallet::{Origin, UserId, WalletId, WalletKey};

pub const MAX_USAGE_LENGTH: usize = 255;

const UUID_LENGTH: usize = 36;

/// Identity the transport attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(UserId),
    Service(String),
}

fn hyphenated_uuid<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.len() != UUID_LENGTH {
        return Err(de::Error::invalid_length(raw.len(), &"a 36 character uuid"));
    }
    Uuid::parse_str(&raw).map_err(de::Error::custom)
}

fn optional_hyphenated_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "hyphenated_uuid")] Uuid);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(id)| id))
}

fn positive_amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match u64::deserialize(deserializer)? {
        0 => Err(de::Error::invalid_value(
            de::Unexpected::Unsigned(0),
            &"a positive amount",
        )),
        amount => Ok(amount),
    }
}

fn usage<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let usage = String::deserialize(deserializer)?;
    if usage.chars().count() > MAX_USAGE_LENGTH {
        return Err(de::Error::custom(format!(
            "usage is longer than {MAX_USAGE_LENGTH} characters"
        )));
    }
    Ok(usage)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalletRef {
    #[serde(rename = "source_uuid", deserialize_with = "hyphenated_uuid")]
    pub wallet_id: WalletId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalletAccess {
    #[serde(rename = "source_uuid", deserialize_with = "hyphenated_uuid")]
    pub wallet_id: WalletId,
    pub key: WalletKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "source_uuid", deserialize_with = "hyphenated_uuid")]
    pub wallet_id: WalletId,
    pub key: WalletKey,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendCoins {
    #[serde(rename = "source_uuid", deserialize_with = "hyphenated_uuid")]
    pub source: WalletId,
    pub key: WalletKey,
    #[serde(rename = "send_amount", deserialize_with = "positive_amount")]
    pub amount: u64,
    #[serde(rename = "destination_uuid", deserialize_with = "hyphenated_uuid")]
    pub destination: WalletId,
    #[serde(default, deserialize_with = "usage")]
    pub usage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PutCoins {
    #[serde(rename = "destination_uuid", deserialize_with = "hyphenated_uuid")]
    pub destination: WalletId,
    #[serde(deserialize_with = "positive_amount")]
    pub amount: u64,
    #[serde(default)]
    pub create_transaction: bool,
    #[serde(
        rename = "source_uuid",
        default,
        deserialize_with = "optional_hyphenated_uuid"
    )]
    pub source: Option<WalletId>,
    #[serde(default, deserialize_with = "usage")]
    pub usage: String,
    #[serde(default)]
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DumpCoins {
    #[serde(rename = "source_uuid", deserialize_with = "hyphenated_uuid")]
    pub source: WalletId,
    pub key: WalletKey,
    #[serde(deserialize_with = "positive_amount")]
    pub amount: u64,
    #[serde(default)]
    pub create_transaction: bool,
    #[serde(
        rename = "destination_uuid",
        default,
        deserialize_with = "optional_hyphenated_uuid"
    )]
    pub destination: Option<WalletId>,
    #[serde(default, deserialize_with = "usage")]
    pub usage: String,
    #[serde(default)]
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRef {
    #[serde(rename = "user_uuid", deserialize_with = "hyphenated_uuid")]
    pub user_id: UserId,
}

/// Operations an authenticated end user may invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRequest {
    Create,
    Get(WalletAccess),
    Transactions(HistoryQuery),
    List,
    Send(SendCoins),
    Reset(WalletRef),
    Delete(WalletAccess),
}

/// Operations reserved for trusted peer services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRequest {
    Exists(WalletRef),
    Owner(WalletRef),
    Put(PutCoins),
    Dump(DumpCoins),
    DeleteUser(UserRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    User(UserRequest),
    Service(ServiceRequest),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Unsupported endpoint {0:?}")]
    UnsupportedEndpoint(Vec<String>),
    #[error("Endpoint `{endpoint}` is not available to this caller")]
    WrongCaller { endpoint: &'static str },
    #[error("Invalid input data: {0}")]
    InvalidInput(#[from] serde_json::Error),
}

type Parser = fn(Value) -> Result<Request, serde_json::Error>;

fn user<T, F>(payload: Value, variant: F) -> Result<Request, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> UserRequest,
{
    serde_json::from_value(payload).map(|p| Request::User(variant(p)))
}

fn service<T, F>(payload: Value, variant: F) -> Result<Request, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> ServiceRequest,
{
    serde_json::from_value(payload).map(|p| Request::Service(variant(p)))
}

fn parse_create(_: Value) -> Result<Request, serde_json::Error> {
    Ok(Request::User(UserRequest::Create))
}

fn parse_get(payload: Value) -> Result<Request, serde_json::Error> {
    user(payload, UserRequest::Get)
}

fn parse_transactions(payload: Value) -> Result<Request, serde_json::Error> {
    user(payload, UserRequest::Transactions)
}

fn parse_list(_: Value) -> Result<Request, serde_json::Error> {
    Ok(Request::User(UserRequest::List))
}

fn parse_send(payload: Value) -> Result<Request, serde_json::Error> {
    user(payload, UserRequest::Send)
}

fn parse_reset(payload: Value) -> Result<Request, serde_json::Error> {
    user(payload, UserRequest::Reset)
}

fn parse_delete(payload: Value) -> Result<Request, serde_json::Error> {
    user(payload, UserRequest::Delete)
}

fn parse_exists(payload: Value) -> Result<Request, serde_json::Error> {
    service(payload, ServiceRequest::Exists)
}

fn parse_owner(payload: Value) -> Result<Request, serde_json::Error> {
    service(payload, ServiceRequest::Owner)
}

fn parse_put(payload: Value) -> Result<Request, serde_json::Error> {
    service(payload, ServiceRequest::Put)
}

fn parse_dump(payload: Value) -> Result<Request, serde_json::Error> {
    service(payload, ServiceRequest::Dump)
}

fn parse_delete_user(payload: Value) -> Result<Request, serde_json::Error> {
    service(payload, ServiceRequest::DeleteUser)
}

/// Operation name to payload parser. Names are unique.
pub const ENDPOINTS: &[(&str, Parser)] = &[
    ("create", parse_create),
    ("get", parse_get),
    ("transactions", parse_transactions),
    ("list", parse_list),
    ("send", parse_send),
    ("reset", parse_reset),
    ("delete", parse_delete),
    ("exists", parse_exists),
    ("owner", parse_owner),
    ("put", parse_put),
    ("dump", parse_dump),
    ("delete_user", parse_delete_user),
];

const SERVICE_PREFIX: &str = "wallet";

impl Request {
    /// Resolves an operation path such as `["send"]` or `["wallet", "send"]`
    /// and validates the payload for it.
    pub fn parse(endpoint: &[String], payload: Value) -> Result<Self, RequestError> {
        let path = match endpoint {
            [prefix, rest @ ..] if prefix == SERVICE_PREFIX => rest,
            path => path,
        };
        let [name] = path else {
            return Err(RequestError::UnsupportedEndpoint(endpoint.to_vec()));
        };
        let Some((_, parse)) = ENDPOINTS.iter().find(|(n, _)| n == name) else {
            return Err(RequestError::UnsupportedEndpoint(endpoint.to_vec()));
        };
        // operations without fields still accept a missing payload
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            payload => payload,
        };
        Ok(parse(payload)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::User(request) => match request {
                UserRequest::Create => "create",
                UserRequest::Get(_) => "get",
                UserRequest::Transactions(_) => "transactions",
                UserRequest::List => "list",
                UserRequest::Send(_) => "send",
                UserRequest::Reset(_) => "reset",
                UserRequest::Delete(_) => "delete",
            },
            Request::Service(request) => match request {
                ServiceRequest::Exists(_) => "exists",
                ServiceRequest::Owner(_) => "owner",
                ServiceRequest::Put(_) => "put",
                ServiceRequest::Dump(_) => "dump",
                ServiceRequest::DeleteUser(_) => "delete_user",
            },
        }
    }
}
