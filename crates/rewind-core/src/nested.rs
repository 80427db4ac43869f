//! Nested chains: an async task that runs a whole chain on its own driver.
//!
//! The inner driver keeps its own history. The outer chain records a single
//! step for the wrapping task: the inner body's return value when the inner
//! chain completes, or the inner failure, which fails the outer chain too.

use std::sync::{Arc, Mutex, PoisonError};

use crate::config::DriverConfig;
use crate::domain::Step;
use crate::driver::Driver;
use crate::error::DriverError;
use crate::typed::{DriverBody, ResultHandler, Scope, Task};

/// A value handed from one callback to another, taken at most once.
struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Slot<T> {
    fn new(value: Option<T>) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    fn put(&self, value: T) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    fn take(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Runs a value-returning body and keeps the value of the completing run.
struct Capture<B, R> {
    body: B,
    output: Slot<R>,
}

impl<B, R> DriverBody for Capture<B, R>
where
    B: Fn(&Scope) -> Step<R> + Send + Sync + 'static,
    R: Send + 'static,
{
    fn run(&self, scope: &Scope) -> Step<()> {
        let value = (self.body)(scope)?;
        self.output.put(value);
        Ok(())
    }
}

impl<A, R> Task<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Build an async task that runs the body `factory(arg)` on a fresh driver.
    ///
    /// The value the inner body returns becomes the result of the outer step.
    /// If the inner chain fails, the outer chain fails with the same error,
    /// reported by whichever call observed the inner failure.
    pub fn nested<F, B>(config: DriverConfig, factory: F) -> Self
    where
        F: Fn(A) -> B + Send + Sync + 'static,
        B: Fn(&Scope) -> Step<R> + Send + Sync + 'static,
    {
        Task::new_async(move |arg: A, handler: ResultHandler<R>| {
            let inner = Driver::with_config(config.clone());
            let outer_chain = handler.chain_id();
            let outer_step = handler.step();
            let outer = Slot::new(Some(handler));
            let output = Slot::new(None);

            let body = Arc::new(Capture {
                body: factory(arg),
                output: output.clone(),
            });
            let on_complete = {
                let outer = outer.clone();
                move || {
                    let Some(handler) = outer.take() else {
                        return;
                    };
                    let Some(value) = output.take() else {
                        tracing::error!(
                            outer_chain = %outer_chain,
                            outer_step,
                            "nested chain completed without a value"
                        );
                        return;
                    };
                    if let Err(err) = handler.complete(value) {
                        tracing::error!(error = %err, "outer chain rejected the nested completion");
                    }
                }
            };
            let on_failure = move |err: DriverError| {
                if let Some(handler) = outer.take()
                    && let Err(rejected) = handler.fail(err)
                {
                    tracing::error!(
                        error = %rejected,
                        "outer chain rejected the nested failure"
                    );
                }
            };

            tracing::debug!(
                outer_chain = %outer_chain,
                outer_step,
                inner = %inner.config().name,
                "launching nested chain"
            );
            if let Err(err) =
                inner.launch_observed(body, Box::new(on_complete), Box::new(on_failure))
            {
                tracing::debug!(
                    error = %err,
                    outer_chain = %outer_chain,
                    outer_step,
                    "nested chain failed on launch"
                );
            }
        })
    }
}
