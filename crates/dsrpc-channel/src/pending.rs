//! Correlation of outstanding calls with their completion handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use dsrpc_frame::{Invocation, Message, MessageKind};
use tracing::{debug, trace};

use crate::error::{CallFailure, ChannelError, Result};
use crate::lock;

/// What a completion handler receives.
pub type CallOutcome = std::result::Result<Message, CallFailure>;

/// Single-shot completion hook supplied with each call.
pub type CompletionHandler = Box<dyn FnOnce(CallOutcome) + Send>;

struct PendingCall {
    method: String,
    response_kind: MessageKind,
    on_complete: CompletionHandler,
    response: Option<CallOutcome>,
}

/// Outstanding calls keyed by id.
///
/// Every saved call has its handler invoked exactly once: by
/// [`complete`](Self::complete), [`fail`](Self::fail) or
/// [`force_completion`](Self::force_completion), whichever removes the entry
/// first. Handlers run without the registry lock held.
pub struct PendingCallRegistry {
    next_id: AtomicU32,
    calls: Mutex<HashMap<u32, PendingCall>>,
    /// Response kinds of abandoned calls whose results may still arrive.
    abandoned: Mutex<HashMap<u32, MessageKind>>,
}

impl PendingCallRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            calls: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(HashMap::new()),
        }
    }

    /// Assign the next id, remember the call, and build its invocation.
    ///
    /// If no id is left the handler is invoked immediately with a failure.
    pub fn allocate_and_save(
        &self,
        method: &str,
        parameters: Vec<u8>,
        fd_count: u32,
        response_kind: MessageKind,
        on_complete: CompletionHandler,
    ) -> Result<Invocation> {
        let Ok(id) = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
        else {
            on_complete(Err(CallFailure::InvalidRequest(
                ChannelError::IdsExhausted.to_string(),
            )));
            return Err(ChannelError::IdsExhausted);
        };

        lock(&self.calls).insert(
            id,
            PendingCall {
                method: method.to_string(),
                response_kind,
                on_complete,
                response: None,
            },
        );
        trace!(id, method, "saved pending call");

        Ok(Invocation {
            id,
            method_name: method.to_string(),
            parameters,
            fds_on_side_channel: fd_count,
        })
    }

    /// How the response for `id` should be parsed, if `id` is outstanding.
    pub fn response_kind(&self, id: u32) -> Option<MessageKind> {
        lock(&self.calls).get(&id).map(|call| call.response_kind)
    }

    /// Store the parsed response for `id` without completing it yet.
    pub fn populate(&self, id: u32, outcome: CallOutcome) -> Result<()> {
        match lock(&self.calls).get_mut(&id) {
            Some(call) => {
                call.response = Some(outcome);
                Ok(())
            }
            None => Err(ChannelError::UnknownCall(id)),
        }
    }

    /// Remove `id` and invoke its handler with the populated response.
    ///
    /// A call completed without a populated response receives an empty
    /// message of its response kind.
    pub fn complete(&self, id: u32) -> Result<()> {
        let call = lock(&self.calls)
            .remove(&id)
            .ok_or(ChannelError::UnknownCall(id))?;

        let outcome = call.response.unwrap_or_else(|| {
            Message::decode(call.response_kind, &[])
                .map_err(|err| CallFailure::InvalidResponse(err.to_string()))
        });
        debug!(id, method = %call.method, ok = outcome.is_ok(), "completing call");
        (call.on_complete)(outcome);
        Ok(())
    }

    /// Remove `id` and invoke its handler with `failure`.
    ///
    /// Returns `false` if `id` was not outstanding.
    pub fn fail(&self, id: u32, failure: CallFailure) -> bool {
        let Some(call) = lock(&self.calls).remove(&id) else {
            return false;
        };
        debug!(id, method = %call.method, %failure, "failing call");
        (call.on_complete)(Err(failure));
        true
    }

    /// Stop waiting for `id`; its handler receives [`CallFailure::Abandoned`].
    ///
    /// The response kind is kept so a late result can still be parsed and
    /// its descriptors read off the stream. Returns `false` if `id` was not
    /// outstanding.
    pub fn abandon(&self, id: u32) -> bool {
        let Some(call) = lock(&self.calls).remove(&id) else {
            return false;
        };
        lock(&self.abandoned).insert(id, call.response_kind);
        debug!(id, method = %call.method, "abandoning call");
        (call.on_complete)(Err(CallFailure::Abandoned));
        true
    }

    /// Response kind of an abandoned call, consumed on first lookup.
    pub fn take_abandoned(&self, id: u32) -> Option<MessageKind> {
        lock(&self.abandoned).remove(&id)
    }

    /// Fail every outstanding call with [`CallFailure::Disconnected`].
    ///
    /// Safe to call repeatedly. Returns the number of calls failed.
    pub fn force_completion(&self) -> usize {
        lock(&self.abandoned).clear();
        let mut drained: Vec<(u32, PendingCall)> = lock(&self.calls).drain().collect();
        let count = drained.len();
        drained.sort_by_key(|(id, _)| *id);
        for (id, call) in drained {
            trace!(id, method = %call.method, "force-completing call");
            (call.on_complete)(Err(CallFailure::Disconnected));
        }
        count
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    use dsrpc_frame::ConnectParameters;

    use super::*;

    type Outcomes = Arc<Mutex<Vec<(u32, CallOutcome)>>>;

    fn recorder(outcomes: &Outcomes, tag: u32) -> CompletionHandler {
        let outcomes = Arc::clone(outcomes);
        Box::new(move |outcome| outcomes.lock().unwrap().push((tag, outcome)))
    }

    #[test]
    fn ids_strictly_increase() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();

        let ids: Vec<u32> = (0..5)
            .map(|n| {
                registry
                    .allocate_and_save("m", Vec::new(), 0, MessageKind::Void, recorder(&outcomes, n))
                    .unwrap()
                    .id
            })
            .collect();

        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn invocation_carries_call_details() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();
        let invocation = registry
            .allocate_and_save(
                "connect",
                vec![1, 2],
                3,
                MessageKind::Connection,
                recorder(&outcomes, 0),
            )
            .unwrap();

        assert_eq!(invocation.method_name, "connect");
        assert_eq!(invocation.parameters, vec![1, 2]);
        assert_eq!(invocation.fds_on_side_channel, 3);
        assert_eq!(
            registry.response_kind(invocation.id),
            Some(MessageKind::Connection)
        );
    }

    #[test]
    fn complete_delivers_populated_response_once() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();
        let id = registry
            .allocate_and_save(
                "m",
                Vec::new(),
                0,
                MessageKind::ConnectParameters,
                recorder(&outcomes, 7),
            )
            .unwrap()
            .id;

        let response = Message::ConnectParameters(ConnectParameters {
            application_name: "demo".into(),
        });
        registry.populate(id, Ok(response)).unwrap();
        registry.complete(id).unwrap();

        assert!(matches!(
            registry.complete(id),
            Err(ChannelError::UnknownCall(unknown)) if unknown == id
        ));
        assert_eq!(registry.force_completion(), 0);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            (7, Ok(Message::ConnectParameters(params))) => {
                assert_eq!(params.application_name, "demo")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn complete_without_populate_yields_empty_message() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();
        let id = registry
            .allocate_and_save("m", Vec::new(), 0, MessageKind::Surface, recorder(&outcomes, 0))
            .unwrap()
            .id;

        registry.complete(id).unwrap();
        assert!(matches!(
            outcomes.lock().unwrap()[0].1,
            Ok(Message::Surface(_))
        ));
    }

    #[test]
    fn force_completion_fails_everything_once() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();
        for n in 0..3 {
            registry
                .allocate_and_save("m", Vec::new(), 0, MessageKind::Void, recorder(&outcomes, n))
                .unwrap();
        }

        assert_eq!(registry.force_completion(), 3);
        assert_eq!(registry.force_completion(), 0);
        assert!(registry.is_empty());

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, Err(CallFailure::Disconnected))));
    }

    #[test]
    fn exhausted_ids_fail_the_handler() {
        let registry = PendingCallRegistry::new();
        registry.next_id.store(u32::MAX, Ordering::SeqCst);
        let outcomes = Outcomes::default();

        let err = registry
            .allocate_and_save("m", Vec::new(), 0, MessageKind::Void, recorder(&outcomes, 0))
            .unwrap_err();
        assert!(matches!(err, ChannelError::IdsExhausted));
        assert!(registry.is_empty());
        assert!(matches!(
            outcomes.lock().unwrap()[0].1,
            Err(CallFailure::InvalidRequest(_))
        ));
    }

    #[test]
    fn populate_unknown_call_is_rejected() {
        let registry = PendingCallRegistry::new();
        assert!(matches!(
            registry.populate(42, Ok(Message::Void)),
            Err(ChannelError::UnknownCall(42))
        ));
        assert!(!registry.fail(42, CallFailure::Disconnected));
    }

    #[test]
    fn handler_may_reenter_registry() {
        let registry = Arc::new(PendingCallRegistry::new());
        let inner = Arc::clone(&registry);
        let id = registry
            .allocate_and_save(
                "m",
                Vec::new(),
                0,
                MessageKind::Void,
                Box::new(move |_| {
                    assert_eq!(inner.len(), 0);
                }),
            )
            .unwrap()
            .id;

        assert!(registry.fail(id, CallFailure::Disconnected));
    }

    #[test]
    fn abandoned_call_keeps_its_response_kind_once() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();
        let id = registry
            .allocate_and_save("m", Vec::new(), 0, MessageKind::SocketFd, recorder(&outcomes, 0))
            .unwrap()
            .id;

        assert!(registry.abandon(id));
        assert!(!registry.abandon(id));
        assert_eq!(registry.response_kind(id), None);
        assert_eq!(registry.take_abandoned(id), Some(MessageKind::SocketFd));
        assert_eq!(registry.take_abandoned(id), None);
        assert!(matches!(
            outcomes.lock().unwrap()[..],
            [(0, Err(CallFailure::Abandoned))]
        ));
    }

    #[test]
    fn force_completion_forgets_abandoned_calls() {
        let registry = PendingCallRegistry::new();
        let outcomes = Outcomes::default();
        let id = registry
            .allocate_and_save("m", Vec::new(), 0, MessageKind::Void, recorder(&outcomes, 0))
            .unwrap()
            .id;
        registry.abandon(id);

        assert_eq!(registry.force_completion(), 0);
        assert_eq!(registry.take_abandoned(id), None);
    }

    #[test]
    fn racing_complete_and_force_completion_fire_each_handler_once() {
        const CALLS: usize = 256;
        let registry = Arc::new(PendingCallRegistry::new());
        let counts: Arc<Vec<AtomicUsize>> =
            Arc::new((0..CALLS).map(|_| AtomicUsize::new(0)).collect());

        let ids: Vec<u32> = (0..CALLS)
            .map(|n| {
                let counts = Arc::clone(&counts);
                registry
                    .allocate_and_save(
                        "m",
                        Vec::new(),
                        0,
                        MessageKind::Void,
                        Box::new(move |_| {
                            counts[n].fetch_add(1, Ordering::SeqCst);
                        }),
                    )
                    .unwrap()
                    .id
            })
            .collect();
        for &id in &ids {
            registry.populate(id, Ok(Message::Void)).unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let completer = {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ids.iter()
                    .filter(|id| registry.complete(**id).is_ok())
                    .count()
            })
        };

        barrier.wait();
        let forced = registry.force_completion();
        let completed = completer.join().unwrap();

        assert_eq!(completed + forced, CALLS);
        assert!(registry.is_empty());
        assert!(counts.iter().all(|count| count.load(Ordering::SeqCst) == 1));
    }
}
