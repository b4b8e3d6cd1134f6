use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::Route;
use super::SlotResolver;
use crate::metadata::MetadataStore;
use crate::network::ConnectionRegistry;
use crate::protocol::BackendRequest;
use crate::protocol::BackendResponse;
use crate::protocol::Command;
use crate::protocol::ErrorCode;
use crate::protocol::Reply;
use crate::BackendError;
use crate::Result;
use crate::RoutingError;

/// The commands the proxy understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyCommand {
    Ping,
    /// Client handshake probe (`COMMAND`, `COMMAND DOCS`, ...)
    Command,
    /// Accepted and ignored, there is a single keyspace
    Select(u32),
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

impl TryFrom<Command> for ProxyCommand {
    type Error = RoutingError;

    fn try_from(command: Command) -> std::result::Result<Self, Self::Error> {
        let Command { name, args } = command;
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(RoutingError::WrongArity(name.to_ascii_lowercase()))
            }
        };

        match name.as_str() {
            "PING" if args.len() <= 1 => Ok(ProxyCommand::Ping),
            "PING" => Err(RoutingError::WrongArity("ping".into())),
            "COMMAND" => Ok(ProxyCommand::Command),
            "SELECT" => {
                arity(1)?;
                let index = std::str::from_utf8(&args[0])
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or_else(|| RoutingError::InvalidDbIndex(String::from_utf8_lossy(&args[0]).into_owned()))?;
                Ok(ProxyCommand::Select(index))
            }
            "GET" => {
                arity(1)?;
                Ok(ProxyCommand::Get { key: args[0].clone() })
            }
            "SET" => {
                arity(2)?;
                Ok(ProxyCommand::Set {
                    key: args[0].clone(),
                    value: args[1].clone(),
                })
            }
            "DEL" => {
                arity(1)?;
                Ok(ProxyCommand::Del { key: args[0].clone() })
            }
            _ => Err(RoutingError::UnsupportedCommand(name)),
        }
    }
}

fn utf8(arg: &Bytes) -> Result<String> {
    String::from_utf8(arg.to_vec()).map_err(|_| BackendError::InvalidUtf8.into())
}

/// Turns a READ response into a bulk or null reply
fn value_reply(response: BackendResponse) -> Result<Reply> {
    match response.code {
        ErrorCode::NoError => Ok(Reply::Bulk(Bytes::from(response.msg))),
        ErrorCode::NotFound => Ok(Reply::Null),
        ErrorCode::Info => Err(BackendError::Server(response.msg).into()),
    }
}

fn check_status(response: BackendResponse) -> Result<()> {
    match response.code {
        ErrorCode::NoError => Ok(()),
        _ => Err(BackendError::Server(response.msg).into()),
    }
}

/// Executes client commands against the cluster.
///
/// Stateless apart from the shared registry and store handles, one instance
/// serves every client connection.
#[derive(Clone)]
pub struct RequestRouter {
    resolver: SlotResolver,
}

impl RequestRouter {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            resolver: SlotResolver::new(store, registry),
        }
    }

    /// Never fails: every error becomes an error reply
    pub async fn dispatch(
        &self,
        command: Command,
    ) -> Reply {
        let name = command.name.clone();
        match self.execute(command).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(command = %name, "request failed: {}", e);
                Reply::error(e.reply_message())
            }
        }
    }

    async fn execute(
        &self,
        command: Command,
    ) -> Result<Reply> {
        match ProxyCommand::try_from(command)? {
            ProxyCommand::Ping => Ok(Reply::Status("PONG".to_string())),
            ProxyCommand::Command | ProxyCommand::Select(_) => Ok(Reply::ok()),
            ProxyCommand::Get { key } => self.get(&key).await,
            ProxyCommand::Set { key, value } => self.set(&key, &value).await,
            ProxyCommand::Del { key } => self.del(&key).await,
        }
    }

    async fn get(
        &self,
        raw_key: &Bytes,
    ) -> Result<Reply> {
        let key = utf8(raw_key)?;
        match self.resolver.resolve(raw_key).await? {
            Route::Normal { owner, .. } => value_reply(owner.client.call(BackendRequest::Read { key }).await?),
            Route::Migrating { slot, source, target } => {
                let response = target.client.call(BackendRequest::Read { key: key.clone() }).await?;
                if !response.is_not_found() {
                    return value_reply(response);
                }
                debug!(slot, key = %key, source = %source.address, "not on migration target, reading source");
                value_reply(source.client.call(BackendRequest::Read { key }).await?)
            }
        }
    }

    /// While migrating, writes only go to the target
    async fn set(
        &self,
        raw_key: &Bytes,
        value: &Bytes,
    ) -> Result<Reply> {
        let key = utf8(raw_key)?;
        let value = utf8(value)?;
        let destination = match self.resolver.resolve(raw_key).await? {
            Route::Normal { owner, .. } => owner,
            Route::Migrating { target, .. } => target,
        };
        check_status(destination.client.call(BackendRequest::Write { key, value }).await?)?;
        Ok(Reply::ok())
    }

    async fn del(
        &self,
        raw_key: &Bytes,
    ) -> Result<Reply> {
        let key = utf8(raw_key)?;
        let destination = match self.resolver.resolve(raw_key).await? {
            Route::Normal { owner, .. } => owner,
            Route::Migrating { slot, source, target } => {
                let probe = target.client.call(BackendRequest::Read { key: key.clone() }).await?;
                match probe.code {
                    ErrorCode::NoError => {
                        check_status(target.client.call(BackendRequest::Delete { key: key.clone() }).await?)?;
                        // a stale copy left on the source would come back through GET fallback
                        debug!(slot, key = %key, source = %source.address, "deleted on migration target, clearing source");
                        source
                    }
                    ErrorCode::NotFound => {
                        debug!(slot, key = %key, source = %source.address, "not on migration target, deleting from source");
                        source
                    }
                    ErrorCode::Info => return Err(BackendError::Server(probe.msg).into()),
                }
            }
        };
        check_status(destination.client.call(BackendRequest::Delete { key }).await?)?;
        Ok(Reply::Integer(1))
    }
}
