//! # Behavior Chain
//!
//! Cross-cutting behaviors wrap request and event handler invocations in a
//! chain-of-responsibility built by function composition: the registered
//! behavior list is folded right-to-left into a single callable, so the
//! first-registered behavior is the outermost wrapper and executes first.
//! The terminal `next` is the actual handler invocation.
//!
//! A behavior may short-circuit by returning a failure outcome without
//! calling `next`; it may also call `next` zero or multiple times. The
//! dispatchers do not enforce single invocation — behavior authors are
//! responsible for idempotent composition.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::context::MessageContext;
use crate::error::DispatchResult;
use crate::message::MessageRef;
use crate::outcome::Outcome;

/// Type-erased success value flowing through a chain. Request dispatch
/// boxes the typed response here and downcasts it back at the boundary;
/// event dispatch carries a unit value.
pub type ErasedValue = Box<dyn Any + Send>;

/// Outcome as seen inside the chain.
pub type ErasedOutcome = Outcome<ErasedValue>;

/// Future returned by a chain segment.
pub type BehaviorFuture<'a> =
    Pin<Box<dyn Future<Output = DispatchResult<ErasedOutcome>> + Send + 'a>>;

/// The remainder of the chain, invoked (or not) by a behavior.
pub type Next<'a> = Box<dyn FnOnce() -> BehaviorFuture<'a> + Send + 'a>;

/// A cross-cutting behavior wrapping handler invocations.
///
/// Behaviors see the message through its type-erased [`MessageRef`] view
/// and can downcast when they need the concrete type.
#[async_trait]
pub trait Behavior: Send + Sync {
    async fn handle<'a>(
        &self,
        ctx: &MessageContext,
        message: &dyn MessageRef,
        next: Next<'a>,
        token: &CancellationToken,
    ) -> DispatchResult<ErasedOutcome>;

    /// Behavior name for logs.
    fn name(&self) -> &str {
        "unnamed_behavior"
    }
}

/// Fold `behaviors` around `terminal` and invoke the composed chain.
///
/// Registration order is execution order: the fold walks the list in
/// reverse so the first-registered behavior ends up outermost.
pub(crate) fn invoke_chain<'a>(
    behaviors: &'a [Arc<dyn Behavior>],
    ctx: &'a MessageContext,
    message: &'a dyn MessageRef,
    token: &'a CancellationToken,
    terminal: Next<'a>,
) -> BehaviorFuture<'a> {
    let mut next = terminal;
    for behavior in behaviors.iter().rev() {
        let inner = next;
        let behavior = Arc::clone(behavior);
        next = Box::new(move || {
            Box::pin(async move { behavior.handle(ctx, message, inner, token).await })
        });
    }
    next()
}
