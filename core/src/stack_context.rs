/*
 * stack_context.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Squall, an asynchronous web server and client library.
 *
 * Squall is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Squall is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Squall.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Exception-scope propagation across asynchronous callback chains.
//!
//! A thread-local stack of error handlers. A scope guard pushes a handler on
//! entry and pops it on every exit path; `wrap` captures a snapshot of the
//! stack so a callback fired later runs under the handlers that were active
//! when it was registered. A handler returns true when it consumed the error;
//! otherwise the next outer handler is tried. Errors escaping all handlers
//! are logged by the reactor's terminal sink.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};

/// A registered exception handler. Returns true if the error was handled.
pub type ExceptionHandler = Rc<dyn Fn(&Error) -> bool>;

/// Snapshot of the handler stack, captured by `wrap` and restored on call.
pub type ContextState = Vec<ExceptionHandler>;

thread_local! {
    static STACK: RefCell<ContextState> = RefCell::new(Vec::new());
}

/// Capture the current handler stack.
pub fn snapshot() -> ContextState {
    STACK.with(|s| s.borrow().clone())
}

/// Scope guard that pushes one handler for its lifetime.
///
/// Create with `ExceptionStackContext::new`; the handler is popped when the
/// guard drops, on normal or early exit alike.
pub struct ExceptionStackContext {
    _private: (),
}

impl ExceptionStackContext {
    pub fn new(handler: impl Fn(&Error) -> bool + 'static) -> Self {
        STACK.with(|s| s.borrow_mut().push(Rc::new(handler)));
        Self { _private: () }
    }
}

impl Drop for ExceptionStackContext {
    fn drop(&mut self) {
        STACK.with(|s| {
            let mut stack = s.borrow_mut();
            debug_assert!(!stack.is_empty());
            stack.pop();
        });
    }
}

/// Scope guard that empties the handler stack for its lifetime. Used when a
/// posted task must escape the enclosing handlers.
pub struct NullContext {
    saved: ContextState,
}

impl NullContext {
    pub fn new() -> Self {
        let saved = STACK.with(|s| std::mem::take(&mut *s.borrow_mut()));
        Self { saved }
    }
}

impl Default for NullContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NullContext {
    fn drop(&mut self) {
        let saved = std::mem::take(&mut self.saved);
        STACK.with(|s| *s.borrow_mut() = saved);
    }
}

/// Run `f` with `state` installed as the handler stack, restoring the
/// previous stack afterwards. An Err return is routed through `state`'s
/// handlers, innermost first.
pub fn run_with_state<F>(state: &ContextState, f: F)
where
    F: FnOnce() -> Result<()>,
{
    let previous = STACK.with(|s| std::mem::replace(&mut *s.borrow_mut(), state.clone()));
    let result = f();
    STACK.with(|s| *s.borrow_mut() = previous);
    if let Err(error) = result {
        dispatch(state, error);
    }
}

/// Wrap a fallible callback so that, when invoked, it runs under the handler
/// stack active right now. Errors are routed to those handlers even if the
/// call site has a different (or empty) stack.
pub fn wrap<F>(f: F) -> impl FnOnce()
where
    F: FnOnce() -> Result<()> + 'static,
{
    let state = snapshot();
    move || run_with_state(&state, f)
}

/// Route an error raised outside `run_with_state` through the current stack.
pub fn handle_exception(error: Error) {
    let state = snapshot();
    dispatch(&state, error);
}

fn dispatch(state: &ContextState, error: Error) {
    if matches!(error, Error::SystemExit) {
        // The reactor treats this as a loop-break sentinel, never a fault.
        crate::reactor::request_exit();
        return;
    }
    for handler in state.iter().rev() {
        if handler(&error) {
            return;
        }
    }
    log::error!("Uncaught exception in callback: {}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn wrapped_callback_restores_snapshot() {
        let hit = Rc::new(Cell::new(false));
        let wrapped = {
            let hit = hit.clone();
            let _scope = ExceptionStackContext::new(move |_| {
                hit.set(true);
                true
            });
            wrap(|| Err(Error::value("boom")))
        };
        // Scope has exited; the stack is empty again.
        assert!(snapshot().is_empty());
        wrapped();
        assert!(hit.get());
    }

    #[test]
    fn unhandled_error_tries_outer_handler() {
        let inner_seen = Rc::new(Cell::new(0));
        let outer_seen = Rc::new(Cell::new(0));
        let _outer = {
            let outer_seen = outer_seen.clone();
            ExceptionStackContext::new(move |_| {
                outer_seen.set(outer_seen.get() + 1);
                true
            })
        };
        let _inner = {
            let inner_seen = inner_seen.clone();
            ExceptionStackContext::new(move |_| {
                inner_seen.set(inner_seen.get() + 1);
                false
            })
        };
        handle_exception(Error::value("fail"));
        assert_eq!(inner_seen.get(), 1);
        assert_eq!(outer_seen.get(), 1);
    }

    #[test]
    fn null_context_hides_handlers() {
        let hit = Rc::new(Cell::new(false));
        let _scope = {
            let hit = hit.clone();
            ExceptionStackContext::new(move |_| {
                hit.set(true);
                true
            })
        };
        let wrapped = {
            let _null = NullContext::new();
            wrap(|| Err(Error::value("escapes")))
        };
        wrapped();
        assert!(!hit.get());
        // Original stack restored after NullContext dropped.
        assert_eq!(snapshot().len(), 1);
    }
}
