use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    command::{Caller, Request, RequestError, ServiceRequest, UserRequest},
    engine::{TransferEngine, WalletError, WalletHistory},
    wallet::{Transaction, UserId, Wallet, WalletId},
};

/// Success payloads. Serialized untagged, so each variant is exactly the
/// JSON object the caller receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success { ok: bool },
    Wallet(Wallet),
    History(WalletHistory),
    Transactions { transactions: Vec<Transaction> },
    Wallets { wallets: Vec<WalletId> },
    Exists { exists: bool },
    Owner { owner: UserId },
    Transaction(Transaction),
}

impl Response {
    pub fn ok() -> Self {
        Response::Success { ok: true }
    }

    fn ok_or_transaction(transaction: Option<Transaction>) -> Self {
        transaction.map_or_else(Self::ok, Response::Transaction)
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl RpcError {
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Request(RequestError::InvalidInput(_)) => "invalid_input_data",
            RpcError::Request(_) => "unsupported_endpoint",
            RpcError::Wallet(err) => err.code(),
        }
    }
}

pub fn error_payload(code: &str) -> Value {
    json!({ "error": code })
}

fn execute_user(
    engine: &TransferEngine,
    user: UserId,
    request: UserRequest,
) -> Result<Response, WalletError> {
    Ok(match request {
        UserRequest::Create => Response::Wallet(engine.create(user)?),
        UserRequest::Get(access) => Response::History(engine.get(&access)?),
        UserRequest::Transactions(query) => Response::Transactions {
            transactions: engine.transactions(&query)?,
        },
        UserRequest::List => Response::Wallets {
            wallets: engine.list(user)?,
        },
        UserRequest::Send(cmd) => {
            engine.send(&cmd)?;
            Response::ok()
        }
        UserRequest::Reset(wallet) => {
            engine.reset(user, wallet.wallet_id)?;
            Response::ok()
        }
        UserRequest::Delete(access) => {
            engine.delete(&access)?;
            Response::ok()
        }
    })
}

fn execute_service(
    engine: &TransferEngine,
    request: ServiceRequest,
) -> Result<Response, WalletError> {
    Ok(match request {
        ServiceRequest::Exists(wallet) => Response::Exists {
            exists: engine.exists(wallet.wallet_id)?,
        },
        ServiceRequest::Owner(wallet) => Response::Owner {
            owner: engine.owner(wallet.wallet_id)?,
        },
        ServiceRequest::Put(cmd) => Response::ok_or_transaction(engine.put(&cmd)?),
        ServiceRequest::Dump(cmd) => Response::ok_or_transaction(engine.dump(&cmd)?),
        ServiceRequest::DeleteUser(user) => {
            engine.delete_user(user.user_id)?;
            Response::ok()
        }
    })
}

/// Runs a parsed request. User operations need a user caller and service
/// operations a service caller.
pub fn execute(
    engine: &TransferEngine,
    caller: &Caller,
    request: Request,
) -> Result<Response, RpcError> {
    match (caller, request) {
        (Caller::User(user), Request::User(request)) => {
            Ok(execute_user(engine, *user, request)?)
        }
        (Caller::Service(_), Request::Service(request)) => Ok(execute_service(engine, request)?),
        (_, request) => Err(RequestError::WrongCaller {
            endpoint: request.name(),
        }
        .into()),
    }
}

/// Transport entry point: always yields exactly one payload, either the
/// success object or `{"error": code}`.
pub fn handle(
    engine: &TransferEngine,
    endpoint: &[String],
    caller: &Caller,
    payload: Value,
) -> Value {
    let result = Request::parse(endpoint, payload)
        .map_err(RpcError::from)
        .and_then(|request| execute(engine, caller, request));

    match result {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(value) => value,
            Err(err) => {
                error!(?endpoint, "Response could not be serialized: {err}");
                error_payload("internal_error")
            }
        },
        Err(RpcError::Wallet(err)) if err.is_internal() => {
            error!(?endpoint, ?caller, "Operation failed: {err}");
            error_payload(err.code())
        }
        Err(err) => {
            debug!(?endpoint, ?caller, "Operation rejected: {err}");
            error_payload(err.code())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::{
        miner::NoMiner,
        notify::LogNotifier,
        store::{LedgerStore, in_memory_store::InMemoryLedgerStore},
    };

    use super::*;

    fn engine() -> (Arc<InMemoryLedgerStore>, TransferEngine) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = TransferEngine::new(store.clone(), Arc::new(NoMiner), Arc::new(LogNotifier));
        (store, engine)
    }

    fn path(name: &str) -> Vec<String> {
        vec![name.to_owned()]
    }

    fn service() -> Caller {
        Caller::Service("game".to_owned())
    }

    #[test]
    fn create_returns_the_wallet() {
        let (_, engine) = engine();
        let user = Uuid::new_v4();
        let caller = Caller::User(user);

        let created = handle(&engine, &path("create"), &caller, json!({}));
        assert_eq!(created["user_uuid"], json!(user.to_string()));
        assert_eq!(created["amount"], json!(0));
        assert_eq!(created["key"].as_str().map(str::len), Some(10));

        let again = handle(&engine, &path("create"), &caller, json!({}));
        assert_eq!(again, json!({"error": "already_own_a_wallet"}));

        let listed = handle(&engine, &path("list"), &caller, Value::Null);
        assert_eq!(listed, json!({"wallets": [created["source_uuid"].clone()]}));
    }

    #[test]
    fn get_flattens_wallet_and_history() {
        let (_, engine) = engine();
        let caller = Caller::User(Uuid::new_v4());
        let wallet = engine.create(Uuid::new_v4()).unwrap();

        let got = handle(
            &engine,
            &path("get"),
            &caller,
            json!({"source_uuid": wallet.id, "key": wallet.key.as_str()}),
        );
        assert_eq!(got["source_uuid"], json!(wallet.id.to_string()));
        assert_eq!(got["transactions"], json!([]));
    }

    #[test]
    fn put_and_dump_over_rpc() {
        let (store, engine) = engine();
        let wallet = engine.create(Uuid::new_v4()).unwrap();

        let put = handle(
            &engine,
            &path("put"),
            &service(),
            json!({"destination_uuid": wallet.id, "amount": 100}),
        );
        assert_eq!(put, json!({"ok": true}));

        let dumped = handle(
            &engine,
            &path("dump"),
            &service(),
            json!({
                "source_uuid": wallet.id,
                "key": wallet.key.as_str(),
                "amount": 58,
                "create_transaction": true,
                "usage": "shop",
                "origin": 4,
            }),
        );
        assert_eq!(dumped["send_amount"], json!(58));
        assert_eq!(dumped["origin"], json!(4));
        assert_eq!(dumped["destination_uuid"], Value::Null);
        assert_eq!(store.wallet(wallet.id).unwrap().unwrap().balance, 42);
    }

    #[test]
    fn service_lookups() {
        let (_, engine) = engine();
        let owner = Uuid::new_v4();
        let wallet = engine.create(owner).unwrap();

        let exists = handle(
            &engine,
            &path("exists"),
            &service(),
            json!({"source_uuid": wallet.id}),
        );
        assert_eq!(exists, json!({"exists": true}));

        let owner_of = handle(
            &engine,
            &path("owner"),
            &service(),
            json!({"source_uuid": wallet.id}),
        );
        assert_eq!(owner_of, json!({"owner": owner.to_string()}));

        let unknown = handle(
            &engine,
            &path("owner"),
            &service(),
            json!({"source_uuid": Uuid::new_v4()}),
        );
        assert_eq!(unknown, json!({"error": "unknown_source_or_destination"}));

        let deleted = handle(
            &engine,
            &path("delete_user"),
            &service(),
            json!({"user_uuid": owner}),
        );
        assert_eq!(deleted, json!({"ok": true}));
        let exists = handle(
            &engine,
            &path("exists"),
            &service(),
            json!({"source_uuid": wallet.id}),
        );
        assert_eq!(exists, json!({"exists": false}));
    }

    #[test]
    fn callers_are_scoped() {
        let (_, engine) = engine();
        let user = Caller::User(Uuid::new_v4());
        let wallet = engine.create(Uuid::new_v4()).unwrap();

        let put = handle(
            &engine,
            &path("put"),
            &user,
            json!({"destination_uuid": wallet.id, "amount": 100}),
        );
        assert_eq!(put, json!({"error": "unsupported_endpoint"}));

        let created = handle(&engine, &path("create"), &service(), json!({}));
        assert_eq!(created, json!({"error": "unsupported_endpoint"}));
    }

    #[test]
    fn malformed_requests() {
        let (_, engine) = engine();
        let user = Caller::User(Uuid::new_v4());

        let unknown = handle(&engine, &path("gift"), &user, json!({}));
        assert_eq!(unknown, json!({"error": "unsupported_endpoint"}));

        let invalid = handle(
            &engine,
            &path("get"),
            &user,
            json!({"source_uuid": "nope", "key": "abcdef0123"}),
        );
        assert_eq!(invalid, json!({"error": "invalid_input_data"}));
    }
}
