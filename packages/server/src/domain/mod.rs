//! ドメイン層
//!
//! ハブが扱う値オブジェクト（識別子・ルーム名・Envelope）と、
//! 外部コラボレータへのインターフェース（ConnectionLog trait）を定義します。

mod connection_log;
mod envelope;
mod error;
mod identity;
mod room;

pub use connection_log::{ClientMetadata, ConnectionLog, ConnectionLogError, ConnectionStatus};
#[cfg(test)]
pub use connection_log::MockConnectionLog;
pub use envelope::{Envelope, EnvelopeKind, SenderInfo};
pub use error::DomainError;
pub use identity::{ConnectionId, PeerIdentity, UserId};
pub use room::RoomName;
