//! ドメイン層のエラー型定義

use thiserror::Error;

/// 値オブジェクト生成時の検証エラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("user id must be 1..={max} characters, got {got}")]
    InvalidUserId { got: usize, max: usize },

    #[error("room name must be 1..={max} characters, got {got}")]
    InvalidRoomName { got: usize, max: usize },
}
