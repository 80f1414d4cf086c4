use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::completion::{Completion, CompletionSender};
use crate::dispatcher::{DispatcherHandle, QueuedWork};
use crate::error::{panic_message, DispatchError, InvalidHandlerReason};

static REGISTRATION_COUNTER: AtomicU64 = AtomicU64::new(1);

type ErasedPayload = Box<dyn Any + Send>;
type ErasedHandler = Rc<RefCell<dyn FnMut(ErasedPayload) -> Option<ErasedPayload>>>;
type ErasedReply = Box<dyn FnOnce(Result<ErasedPayload, DispatchError>) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Names a handler as `target` (the owning object) plus `handler`.
pub struct HandlerKey {
    target: String,
    handler: String,
}

impl HandlerKey {
    pub fn new(target: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            handler: handler.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    fn invalid(&self, reason: InvalidHandlerReason) -> DispatchError {
        DispatchError::InvalidHandler {
            target: self.target.clone(),
            handler: self.handler.clone(),
            reason,
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.target, self.handler)
    }
}

#[derive(Debug, Clone, Copy)]
struct HandlerSignature {
    registration_id: u64,
    argument: TypeId,
    output: TypeId,
    argument_name: &'static str,
}

/// Thread-safe view of which handlers may be invoked and with which types.
#[derive(Debug, Default)]
pub(crate) struct AllowList {
    entries: RwLock<HashMap<HandlerKey, HandlerSignature>>,
}

impl AllowList {
    fn insert(&self, key: HandlerKey, signature: HandlerSignature) -> Result<(), DispatchError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return Err(DispatchError::DuplicateHandler {
                target: key.target,
                handler: key.handler,
            });
        }
        entries.insert(key, signature);
        Ok(())
    }

    fn remove(&self, key: &HandlerKey, registration_id: u64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(key)
            .is_some_and(|signature| signature.registration_id == registration_id)
        {
            entries.remove(key);
        }
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn resolve(
        &self,
        key: &HandlerKey,
        expected_registration: Option<u64>,
        argument: TypeId,
        output: Option<TypeId>,
    ) -> Result<u64, DispatchError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let missing = if expected_registration.is_some() {
            InvalidHandlerReason::Unregistered
        } else {
            InvalidHandlerReason::NotRegistered
        };
        let signature = entries.get(key).ok_or_else(|| key.invalid(missing))?;
        if expected_registration.is_some_and(|expected| expected != signature.registration_id) {
            return Err(key.invalid(InvalidHandlerReason::Unregistered));
        }
        if signature.argument != argument {
            tracing::warn!(
                handler = %key,
                expected = signature.argument_name,
                "cross-thread invocation argument type mismatch"
            );
            return Err(key.invalid(InvalidHandlerReason::ArgumentTypeMismatch));
        }
        if output.is_some_and(|output| output != signature.output) {
            return Err(key.invalid(InvalidHandlerReason::ReturnTypeMismatch));
        }
        Ok(signature.registration_id)
    }
}

pub(crate) struct Invocation {
    key: HandlerKey,
    registration_id: u64,
    payload: ErasedPayload,
    reply: Option<ErasedReply>,
}

impl Invocation {
    fn reject(self, reason: InvalidHandlerReason) -> InvocationOutcome {
        tracing::warn!(handler = %self.key, %reason, "dropping cross-thread invocation");
        if let Some(reply) = self.reply {
            reply(Err(self.key.invalid(reason)));
        }
        InvocationOutcome::Rejected
    }
}

pub(crate) enum InvocationOutcome {
    Executed,
    Panicked,
    Rejected,
}

/// Main-thread side of the registry: the handlers themselves.
pub(crate) struct HandlerTable {
    allow_list: std::sync::Arc<AllowList>,
    handlers: RefCell<HashMap<HandlerKey, (u64, ErasedHandler)>>,
}

impl HandlerTable {
    pub(crate) fn new(allow_list: std::sync::Arc<AllowList>) -> Self {
        Self {
            allow_list,
            handlers: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn register<A, R, F>(
        table: &Rc<Self>,
        key: HandlerKey,
        handle: DispatcherHandle,
        mut callback: F,
    ) -> Result<HandlerRegistration<A, R>, DispatchError>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: FnMut(A) -> R + 'static,
    {
        let registration_id = REGISTRATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        table.allow_list.insert(
            key.clone(),
            HandlerSignature {
                registration_id,
                argument: TypeId::of::<A>(),
                output: TypeId::of::<R>(),
                argument_name: type_name::<A>(),
            },
        )?;
        let erased: ErasedHandler = Rc::new(RefCell::new(move |payload: ErasedPayload| {
            let arguments = payload.downcast::<A>().ok()?;
            Some(Box::new(callback(*arguments)) as ErasedPayload)
        }));
        table
            .handlers
            .borrow_mut()
            .insert(key.clone(), (registration_id, erased));
        tracing::debug!(handler = %key, registration_id, "registered main-thread handler");
        Ok(HandlerRegistration {
            key,
            registration_id,
            table: Rc::downgrade(table),
            handle,
            _signature: PhantomData,
        })
    }

    pub(crate) fn dispatch(&self, invocation: Invocation) -> InvocationOutcome {
        let handler = self
            .handlers
            .borrow()
            .get(&invocation.key)
            .filter(|(registration_id, _)| *registration_id == invocation.registration_id)
            .map(|(_, handler)| Rc::clone(handler));
        let Some(handler) = handler else {
            return invocation.reject(InvalidHandlerReason::Unregistered);
        };
        let Ok(mut callback) = handler.try_borrow_mut() else {
            return invocation.reject(InvalidHandlerReason::Reentrant);
        };

        let Invocation {
            key,
            payload,
            reply,
            ..
        } = invocation;
        let result = match catch_unwind(AssertUnwindSafe(|| (&mut *callback)(payload))) {
            Ok(Some(output)) => Ok(output),
            Ok(None) => Err(key.invalid(InvalidHandlerReason::ArgumentTypeMismatch)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(handler = %key, error = %message, "main-thread handler panicked");
                Err(DispatchError::WorkPanicked(message))
            }
        };
        drop(callback);

        let outcome = match &result {
            Ok(_) => InvocationOutcome::Executed,
            Err(DispatchError::WorkPanicked(_)) => InvocationOutcome::Panicked,
            Err(_) => InvocationOutcome::Rejected,
        };
        if let Some(reply) = reply {
            reply(result);
        }
        outcome
    }

    fn remove(&self, key: &HandlerKey, registration_id: u64) {
        let removed = {
            let mut handlers = self.handlers.borrow_mut();
            match handlers.get(key) {
                Some((current, _)) if *current == registration_id => handlers.remove(key),
                _ => None,
            }
        };
        drop(removed);
    }

    pub(crate) fn clear(&self) {
        self.allow_list.clear();
        let drained = std::mem::take(&mut *self.handlers.borrow_mut());
        drop(drained);
    }
}

/// Keeps a handler invokable. Dropping it removes the handler from the
/// allow-list; invocations already queued are then rejected.
pub struct HandlerRegistration<A, R> {
    key: HandlerKey,
    registration_id: u64,
    table: Weak<HandlerTable>,
    handle: DispatcherHandle,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> fmt::Debug for HandlerRegistration<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("key", &self.key)
            .field("registration_id", &self.registration_id)
            .finish()
    }
}

impl<A, R> HandlerRegistration<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    /// Returns a typed, thread-safe reference to this handler.
    pub fn invoker(&self) -> TypedInvoker<A, R> {
        TypedInvoker {
            key: self.key.clone(),
            registration_id: self.registration_id,
            handle: self.handle.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, R> Drop for HandlerRegistration<A, R> {
    fn drop(&mut self) {
        self.handle
            .allow_list
            .remove(&self.key, self.registration_id);
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.key, self.registration_id);
        }
        tracing::debug!(handler = %self.key, "unregistered main-thread handler");
    }
}

/// Typed reference to one registration, usable from any thread.
pub struct TypedInvoker<A, R> {
    key: HandlerKey,
    registration_id: u64,
    handle: DispatcherHandle,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for TypedInvoker<A, R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            registration_id: self.registration_id,
            handle: self.handle.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for TypedInvoker<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedInvoker")
            .field("key", &self.key)
            .field("registration_id", &self.registration_id)
            .finish()
    }
}

impl<A, R> TypedInvoker<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    /// Queues the handler for the next main-thread drain.
    pub fn invoke(&self, arguments: A) -> Result<(), DispatchError> {
        self.handle
            .submit::<A, R>(&self.key, Some(self.registration_id), arguments, None)
    }

    pub fn invoke_async(&self, arguments: A) -> Result<Completion<R>, DispatchError> {
        let (sender, completion) = Completion::channel();
        self.handle.submit::<A, R>(
            &self.key,
            Some(self.registration_id),
            arguments,
            Some(sender),
        )?;
        Ok(completion)
    }
}

impl DispatcherHandle {
    /// Invokes a registered handler by name. Invocations are always queued, even
    /// from the main thread, so a handler never runs inside another handler.
    pub fn invoke<A>(&self, target: &str, handler: &str, arguments: A) -> Result<(), DispatchError>
    where
        A: Send + 'static,
    {
        let key = HandlerKey::new(target, handler);
        let registration_id =
            self.allow_list
                .resolve(&key, None, TypeId::of::<A>(), None)?;
        self.push(QueuedWork::Invoke(Invocation {
            key,
            registration_id,
            payload: Box::new(arguments),
            reply: None,
        }))
    }

    pub fn invoke_async<A, R>(
        &self,
        target: &str,
        handler: &str,
        arguments: A,
    ) -> Result<Completion<R>, DispatchError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let key = HandlerKey::new(target, handler);
        let (sender, completion) = Completion::channel();
        self.submit::<A, R>(&key, None, arguments, Some(sender))?;
        Ok(completion)
    }

    fn submit<A, R>(
        &self,
        key: &HandlerKey,
        expected_registration: Option<u64>,
        arguments: A,
        reply: Option<CompletionSender<R>>,
    ) -> Result<(), DispatchError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let output = reply.as_ref().map(|_| TypeId::of::<R>());
        let registration_id =
            self.allow_list
                .resolve(key, expected_registration, TypeId::of::<A>(), output)?;
        let reply = reply.map(|sender| {
            let reply_key = key.clone();
            Box::new(move |result: Result<ErasedPayload, DispatchError>| {
                let typed = result.and_then(|payload| {
                    payload
                        .downcast::<R>()
                        .map(|value| *value)
                        .map_err(|_| reply_key.invalid(InvalidHandlerReason::ReturnTypeMismatch))
                });
                let _ = sender.send(typed);
            }) as ErasedReply
        });
        self.push(QueuedWork::Invoke(Invocation {
            key: key.clone(),
            registration_id,
            payload: Box::new(arguments),
            reply,
        }))
    }
}
