//! DriverBody - 再実行されるユーザーロジック
//!
//! body は async step が完了するたびに先頭から呼び直されます。記録済みの
//! ステップはキャッシュから即座に返るので、書き手からは 1 回しか実行されて
//! いないように見えます。この錯覚を保つためのルール:
//!
//! - body の外側にある可変な状態は、直接読まずに task 経由で読む
//!   （読み取り結果がキャッシュされ、再実行しても同じ分岐を通る）
//! - dispatch を `match`/`if let` で握りつぶさず、`?` でそのまま返す
//!   （エラー後に別の経路を通ると、ドリフトと区別できない）
//!
//! 各 body の上にこの注意書きを残しておくことを勧めます:
//!
//! ```text
//! // ATTENTION: this body is re-run from the top on every completion,
//! // with task results read from cache. Read outside state through tasks only.
//! ```

use crate::domain::{ChainId, Step};
use crate::driver::Driver;
use crate::typed::Task;

/// User logic driven by a `Driver`.
pub trait DriverBody: Send + Sync + 'static {
    fn run(&self, scope: &Scope) -> Step<()>;
}

impl<F> DriverBody for F
where
    F: Fn(&Scope) -> Step<()> + Send + Sync + 'static,
{
    fn run(&self, scope: &Scope) -> Step<()> {
        self(scope)
    }
}

/// Dispatch entry point handed to one invocation of a body.
///
/// A scope belongs to exactly one invocation. Once the chain has been resumed
/// past it (or finished), dispatching through it answers `Halt::Suspended`
/// without touching the history.
#[derive(Debug, Clone)]
pub struct Scope {
    driver: Driver,
    chain: ChainId,
    invocation: u64,
}

impl Scope {
    pub(crate) fn new(driver: Driver, chain: ChainId, invocation: u64) -> Self {
        Self {
            driver,
            chain,
            invocation,
        }
    }

    /// Run `task` with `arg`, or replay its cached result for this step.
    pub fn execute<A, R>(&self, task: &Task<A, R>, arg: A) -> Step<R>
    where
        A: Send + 'static,
        R: Clone + Send + 'static,
    {
        self.driver.dispatch(self, task, arg)
    }

    /// `execute` for tasks that take no argument.
    pub fn call<R>(&self, task: &Task<(), R>) -> Step<R>
    where
        R: Clone + Send + 'static,
    {
        self.execute(task, ())
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain
    }

    /// 1-based count of body invocations within this chain.
    pub fn invocation(&self) -> u64 {
        self.invocation
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }
}
