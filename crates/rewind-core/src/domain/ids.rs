//! Identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! タスクの同一性は「値の等しさ」ではなく、ハンドル発行時に払い出した ID で判定します。
//! `Id<T>` の `T` は実行時には使わないマーカー型で、`TaskId` と `ChainId` を
//! コンパイル時に区別します。
//!
//! - **TaskId**: `Task` ハンドル 1 つにつき 1 つ。clone しても変わらない
//! - **ChainId**: `Driver::launch` で始まる 1 回の論理実行（chain）ごとに 1 つ

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "chain-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 新しい ID を払い出す
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Chain のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {}

impl IdMarker for Chain {
    fn prefix() -> &'static str {
        "chain-"
    }
}

/// Identity of a registered task handle.
pub type TaskId = Id<Task>;

/// Identity of one chain (launch through completion).
pub type ChainId = Id<Chain>;
