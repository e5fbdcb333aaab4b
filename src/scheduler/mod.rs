//! Single-channel command scheduler.
//!
//! Every exchange with the mesh goes through one ordered queue of primitive
//! steps. The queue drains until it reaches a wait; the wait stays
//! outstanding until a matching frame arrives or its timer expires, and only
//! then does draining resume. At most one wait is outstanding at any time.
//!
//! The scheduler is generic over the continuation type `C`; whoever owns the
//! protocol state runs continuations through [`Executor`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::protocol::{ApiFrame, InboundFrame, NetworkAddress64};

/// Default time to wait for a response.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait time for sleepy devices whose parent buffers frames on their behalf.
pub const EXTENDED_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total transmissions of one exchange before it is abandoned.
pub const DEFAULT_RETRY_MAX: u8 = 3;

/// Queue priority; lower sorts earlier, `None` sorts after prioritized work.
pub type Priority = Option<u8>;

/// A frame to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub frame: ApiFrame,
    /// Set when this is a retransmission after a timeout.
    pub resend: bool,
}

impl Outbound {
    /// Creates a first transmission.
    #[must_use]
    pub const fn new(frame: ApiFrame) -> Self {
        Self {
            frame,
            resend: false,
        }
    }
}

/// Property whose pending write should be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub addr64: NetworkAddress64,
    pub property: String,
}

/// Kind of frame a wait is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Management,
    Application,
    LocalResponse,
}

/// Predicate selecting the inbound frame that resolves a wait.
///
/// Unset discriminators match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMatcher {
    pub kind: MatchKind,
    pub addr64: Option<NetworkAddress64>,
    pub cluster_id: Option<u16>,
    /// Transaction sequence, application sequence or local frame id.
    pub sequence: Option<u8>,
    pub source_endpoint: Option<u8>,
    pub command_id: Option<u8>,
}

impl FrameMatcher {
    /// Matches a management response by cluster and transaction sequence.
    ///
    /// Address requests are answered by whichever device knows the target, so
    /// the sender is only checked when `addr64` is set.
    #[must_use]
    pub const fn management(
        addr64: Option<NetworkAddress64>,
        response_cluster: u16,
        tsn: u8,
    ) -> Self {
        Self {
            kind: MatchKind::Management,
            addr64,
            cluster_id: Some(response_cluster),
            sequence: Some(tsn),
            source_endpoint: None,
            command_id: None,
        }
    }

    /// Matches any application frame answering `sequence`.
    #[must_use]
    pub const fn application(
        addr64: NetworkAddress64,
        endpoint: u8,
        cluster_id: u16,
        sequence: u8,
    ) -> Self {
        Self {
            kind: MatchKind::Application,
            addr64: Some(addr64),
            cluster_id: Some(cluster_id),
            sequence: Some(sequence),
            source_endpoint: Some(endpoint),
            command_id: None,
        }
    }

    /// Matches the coordinator's answer to a local command.
    #[must_use]
    pub const fn local(frame_id: u8) -> Self {
        Self {
            kind: MatchKind::LocalResponse,
            addr64: None,
            cluster_id: None,
            sequence: Some(frame_id),
            source_endpoint: None,
            command_id: None,
        }
    }

    /// Restricts the match to one command id.
    #[must_use]
    pub const fn command(mut self, command_id: u8) -> Self {
        self.command_id = Some(command_id);
        self
    }

    /// Returns true if `frame` resolves this wait.
    #[must_use]
    pub fn matches(&self, frame: &InboundFrame) -> bool {
        let (kind, source, cluster_id, sequence, command_id) = match frame {
            InboundFrame::Management { source, frame } => (
                MatchKind::Management,
                Some(source),
                Some(frame.message.cluster_id()),
                frame.tsn,
                None,
            ),
            InboundFrame::Application {
                source,
                cluster_id,
                frame,
                ..
            } => (
                MatchKind::Application,
                Some(source),
                Some(*cluster_id),
                frame.header.sequence,
                Some(frame.header.command_id),
            ),
            InboundFrame::LocalResponse(local) => {
                (MatchKind::LocalResponse, None, None, local.frame_id, None)
            }
            InboundFrame::TxStatus(_) | InboundFrame::ModemStatus(_) => return false,
        };

        kind == self.kind
            && self.sequence.is_none_or(|s| s == sequence)
            && self.cluster_id.is_none_or(|c| Some(c) == cluster_id)
            && self.command_id.is_none_or(|c| Some(c) == command_id)
            && self
                .addr64
                .is_none_or(|a| source.is_some_and(|s| s.addr64 == a))
            && self
                .source_endpoint
                .is_none_or(|e| source.is_some_and(|s| s.endpoint == e))
    }
}

/// A wait step: predicate, continuations and retry policy.
#[derive(Debug)]
pub struct WaitSpec<C> {
    pub matcher: FrameMatcher,
    /// Runs with the matching frame.
    pub on_success: Option<C>,
    /// Runs once the retry budget is exhausted.
    pub on_timeout: Option<C>,
    /// Enqueued at front when the match carries a success status.
    pub send_on_success: Vec<Command<C>>,
    pub retry_max: u8,
    pub extended_timeout: bool,
    attempt: u8,
}

impl<C> WaitSpec<C> {
    /// Creates a wait with the default retry budget.
    #[must_use]
    pub const fn new(matcher: FrameMatcher) -> Self {
        Self {
            matcher,
            on_success: None,
            on_timeout: None,
            send_on_success: Vec::new(),
            retry_max: DEFAULT_RETRY_MAX,
            extended_timeout: false,
            attempt: 1,
        }
    }

    /// Sets the success continuation.
    #[must_use]
    pub fn on_success(mut self, step: C) -> Self {
        self.on_success = Some(step);
        self
    }

    /// Sets the timeout continuation.
    #[must_use]
    pub fn on_timeout(mut self, step: C) -> Self {
        self.on_timeout = Some(step);
        self
    }

    /// Sets the same continuation for success and timeout.
    #[must_use]
    pub fn on_either(self, step: C) -> Self
    where
        C: Clone,
    {
        self.on_success(step.clone()).on_timeout(step)
    }

    /// Sets the follow-up batch sent when the response reports success.
    #[must_use]
    pub fn send_on_success(mut self, commands: Vec<Command<C>>) -> Self {
        self.send_on_success = commands;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn retry_max(mut self, retry_max: u8) -> Self {
        self.retry_max = retry_max;
        self
    }

    /// Uses the extended timeout.
    #[must_use]
    pub const fn extended(mut self, extended: bool) -> Self {
        self.extended_timeout = extended;
        self
    }

    /// Current transmission attempt, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u8 {
        self.attempt
    }
}

/// One scheduler step.
#[derive(Debug)]
pub enum Command<C> {
    Send(Outbound),
    Wait(WaitSpec<C>),
    Run(C),
    CompleteWrite(WriteTarget),
}

/// Owner of the protocol state, driven by the scheduler.
pub trait Executor<C> {
    /// Writes a frame to the transport.
    fn transmit(&mut self, outbound: &Outbound) -> Result<()>;

    /// Runs a continuation; `frame` is the matching frame for success continuations.
    fn execute(&mut self, step: C, frame: Option<&InboundFrame>, scheduler: &mut Scheduler<C>);

    /// Resolves a pending write.
    fn complete_write(&mut self, target: WriteTarget);
}

#[derive(Debug)]
struct Entry<C> {
    command: Command<C>,
    priority: Priority,
    /// Commands enqueued together share a batch.
    batch: u64,
}

#[derive(Debug)]
struct Outstanding<C> {
    wait: WaitSpec<C>,
    sent: Option<Outbound>,
    priority: Priority,
    deadline: Instant,
}

/// The command queue plus the single outstanding wait.
#[derive(Debug)]
pub struct Scheduler<C> {
    queue: VecDeque<Entry<C>>,
    outstanding: Option<Outstanding<C>>,
    next_batch: u64,
    running: bool,
    wait_timeout: Duration,
    extended_timeout: Duration,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_TIMEOUT, EXTENDED_WAIT_TIMEOUT)
    }
}

impl<C> Scheduler<C> {
    /// Creates an empty scheduler.
    #[must_use]
    pub const fn new(wait_timeout: Duration, extended_timeout: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            outstanding: None,
            next_batch: 0,
            running: false,
            wait_timeout,
            extended_timeout,
        }
    }

    /// Appends commands behind work of equal or higher priority.
    pub fn enqueue(&mut self, commands: Vec<Command<C>>, priority: Priority) {
        let index = match priority {
            None => None,
            Some(p) => self
                .queue
                .iter()
                .position(|e| e.priority.is_none_or(|q| q > p)),
        };
        self.insert(index, commands, priority);
    }

    /// Inserts commands ahead of queued work of the same priority.
    pub fn enqueue_front(&mut self, commands: Vec<Command<C>>, priority: Priority) {
        let index = match priority {
            None => self.queue.iter().position(|e| e.priority.is_none()),
            Some(p) => self
                .queue
                .iter()
                .position(|e| e.priority.is_none_or(|q| q >= p)),
        };
        self.insert(index, commands, priority);
    }

    fn insert(&mut self, index: Option<usize>, commands: Vec<Command<C>>, priority: Priority) {
        let index = index.unwrap_or(self.queue.len());
        let batch = self.next_batch;
        self.next_batch = self.next_batch.wrapping_add(1);
        for (offset, command) in commands.into_iter().enumerate() {
            self.queue.insert(
                index + offset,
                Entry {
                    command,
                    priority,
                    batch,
                },
            );
        }
    }

    /// Number of queued commands, not counting the outstanding wait.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is queued or outstanding.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.outstanding.is_none()
    }

    /// Returns true while a wait is outstanding.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.outstanding.is_some()
    }

    /// When the outstanding wait expires.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.outstanding.as_ref().map(|o| o.deadline)
    }

    /// Drains the queue until it is empty or a wait is reached.
    pub fn run<E: Executor<C>>(&mut self, now: Instant, exec: &mut E) {
        if self.running {
            return;
        }
        self.running = true;

        while self.outstanding.is_none() {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            match entry.command {
                Command::Send(outbound) => {
                    if let Err(e) = exec.transmit(&outbound) {
                        tracing::error!("transmit failed, abandoning exchange: {}", e);
                        self.abandon_paired_wait(entry.batch, exec);
                        continue;
                    }
                    if let Some(Entry {
                        command: Command::Wait(wait),
                        priority,
                        ..
                    }) = self.take_paired_wait(entry.batch)
                    {
                        self.arm(wait, Some(outbound), priority, now);
                    }
                }
                Command::Wait(wait) => self.arm(wait, None, entry.priority, now),
                Command::Run(step) => exec.execute(step, None, self),
                Command::CompleteWrite(target) => exec.complete_write(target),
            }
        }

        self.running = false;
    }

    fn arm(
        &mut self,
        wait: WaitSpec<C>,
        sent: Option<Outbound>,
        priority: Priority,
        now: Instant,
    ) {
        let timeout = if wait.extended_timeout {
            self.extended_timeout
        } else {
            self.wait_timeout
        };
        self.outstanding = Some(Outstanding {
            sent,
            priority,
            deadline: now + timeout,
            wait,
        });
    }

    /// Pops the wait enqueued together with the send from `batch`.
    ///
    /// Only that wait retransmits the frame; a wait from another batch that
    /// happens to follow stays queued.
    fn take_paired_wait(&mut self, batch: u64) -> Option<Entry<C>> {
        if matches!(
            self.queue.front(),
            Some(Entry {
                command: Command::Wait(_),
                batch: b,
                ..
            }) if *b == batch
        ) {
            self.queue.pop_front()
        } else {
            None
        }
    }

    fn abandon_paired_wait<E: Executor<C>>(&mut self, batch: u64, exec: &mut E) {
        if let Some(Entry {
            command: Command::Wait(WaitSpec {
                on_timeout: Some(step),
                ..
            }),
            ..
        }) = self.take_paired_wait(batch)
        {
            exec.execute(step, None, self);
        }
    }

    /// The frame the outstanding wait retransmits, if it was paired with one.
    #[must_use]
    pub fn outstanding_frame(&self) -> Option<&Outbound> {
        self.outstanding.as_ref().and_then(|o| o.sent.as_ref())
    }

    /// Gives up on the outstanding wait without further retries.
    ///
    /// Its timeout continuation runs at once and the queue moves on.
    pub fn abandon_outstanding<E: Executor<C>>(&mut self, now: Instant, exec: &mut E) {
        let Some(outstanding) = self.outstanding.take() else {
            return;
        };
        if let Some(step) = outstanding.wait.on_timeout {
            self.execute_guarded(exec, step, None);
        }
        self.run(now, exec);
    }

    /// Offers an inbound frame to the outstanding wait.
    ///
    /// Returns true if the frame resolved it.
    pub fn handle_frame<E: Executor<C>>(
        &mut self,
        frame: &InboundFrame,
        now: Instant,
        exec: &mut E,
    ) -> bool {
        if !self
            .outstanding
            .as_ref()
            .is_some_and(|o| o.wait.matcher.matches(frame))
        {
            return false;
        }
        let Some(Outstanding { wait, priority, .. }) = self.outstanding.take() else {
            return false;
        };

        if frame.is_success() && !wait.send_on_success.is_empty() {
            self.enqueue_front(wait.send_on_success, priority);
        }
        if let Some(step) = wait.on_success {
            self.execute_guarded(exec, step, Some(frame));
        }
        self.run(now, exec);
        true
    }

    /// Expires the outstanding wait if its deadline has passed.
    ///
    /// Before the retry budget is spent the last frame is retransmitted and
    /// the wait re-armed ahead of other work; afterwards the timeout
    /// continuation runs once and the queue moves on.
    pub fn handle_timeout<E: Executor<C>>(&mut self, now: Instant, exec: &mut E) {
        if !self.outstanding.as_ref().is_some_and(|o| o.deadline <= now) {
            return;
        }
        let Some(Outstanding {
            mut wait,
            sent,
            priority,
            ..
        }) = self.outstanding.take()
        else {
            return;
        };

        if wait.attempt < wait.retry_max {
            wait.attempt += 1;
            tracing::debug!(
                "no response, attempt {}/{} for {:?}",
                wait.attempt,
                wait.retry_max,
                wait.matcher.kind
            );
            let mut retry = Vec::with_capacity(2);
            if let Some(mut sent) = sent {
                sent.resend = true;
                retry.push(Command::Send(sent));
            }
            retry.push(Command::Wait(wait));
            self.enqueue_front(retry, priority);
        } else {
            tracing::warn!(
                "no response after {} attempts, giving up on {:?} exchange",
                wait.retry_max,
                wait.matcher.kind
            );
            if let Some(step) = wait.on_timeout {
                self.execute_guarded(exec, step, None);
            }
        }
        self.run(now, exec);
    }

    fn execute_guarded<E: Executor<C>>(
        &mut self,
        exec: &mut E,
        step: C,
        frame: Option<&InboundFrame>,
    ) {
        let was_running = std::mem::replace(&mut self.running, true);
        exec.execute(step, frame, self);
        self.running = was_running;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::protocol::LocalFrame;

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        fail_frame: Option<u8>,
    }

    fn frame_id(outbound: &Outbound) -> u8 {
        match &outbound.frame {
            ApiFrame::LocalCommand(local) => local.frame_id,
            _ => 0,
        }
    }

    impl Executor<&'static str> for Recorder {
        fn transmit(&mut self, outbound: &Outbound) -> Result<()> {
            let id = frame_id(outbound);
            if self.fail_frame == Some(id) {
                return Err(Error::NotConnected);
            }
            let tag = if outbound.resend { "resend" } else { "send" };
            self.log.push(format!("{tag}:{id}"));
            Ok(())
        }

        fn execute(
            &mut self,
            step: &'static str,
            frame: Option<&InboundFrame>,
            _scheduler: &mut Scheduler<&'static str>,
        ) {
            let suffix = if frame.is_some() { "+frame" } else { "" };
            self.log.push(format!("run:{step}{suffix}"));
        }

        fn complete_write(&mut self, target: WriteTarget) {
            self.log.push(format!("write:{}", target.property));
        }
    }

    fn send(id: u8) -> Command<&'static str> {
        Command::Send(Outbound::new(ApiFrame::LocalCommand(LocalFrame {
            frame_id: id,
            command: *b"EU",
            status: 0,
            data: Bytes::new(),
        })))
    }

    fn wait(id: u8) -> WaitSpec<&'static str> {
        WaitSpec::new(FrameMatcher::local(id))
    }

    fn response(id: u8, status: u8) -> InboundFrame {
        InboundFrame::LocalResponse(LocalFrame {
            frame_id: id,
            command: *b"EU",
            status,
            data: Bytes::new(),
        })
    }

    #[test]
    fn test_priority_ordering() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        scheduler.enqueue(vec![Command::Run("five")], Some(5));
        scheduler.enqueue(vec![Command::Run("none")], None);
        scheduler.enqueue(vec![Command::Run("two")], Some(2));
        scheduler.run(Instant::now(), &mut exec);
        assert_eq!(exec.log, ["run:two", "run:five", "run:none"]);
    }

    #[test]
    fn test_enqueue_front_same_priority_goes_first() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        scheduler.enqueue(vec![Command::Run("old")], Some(3));
        scheduler.enqueue_front(vec![Command::Run("new")], Some(3));
        scheduler.enqueue(vec![Command::Run("later")], Some(3));
        scheduler.run(Instant::now(), &mut exec);
        assert_eq!(exec.log, ["run:new", "run:old", "run:later"]);
    }

    #[test]
    fn test_priority_less_is_fifo_behind_prioritized_work() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        scheduler.enqueue(vec![Command::Run("a")], None);
        scheduler.enqueue(vec![Command::Run("b")], None);
        scheduler.enqueue_front(vec![Command::Run("c")], None);
        scheduler.enqueue(vec![Command::Run("p")], Some(9));
        scheduler.run(Instant::now(), &mut exec);
        assert_eq!(exec.log, ["run:p", "run:c", "run:a", "run:b"]);
    }

    #[test]
    fn test_batch_stays_contiguous() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        scheduler.enqueue(vec![Command::Run("x")], Some(1));
        scheduler.enqueue_front(vec![Command::Run("a"), Command::Run("b")], Some(1));
        scheduler.run(Instant::now(), &mut exec);
        assert_eq!(exec.log, ["run:a", "run:b", "run:x"]);
    }

    #[test]
    fn test_single_outstanding_wait() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();
        scheduler.enqueue(
            vec![send(1), Command::Wait(wait(1).on_success("first"))],
            None,
        );
        scheduler.enqueue(
            vec![send(2), Command::Wait(wait(2).on_success("second"))],
            None,
        );
        scheduler.run(now, &mut exec);
        assert_eq!(exec.log, ["send:1"]);
        assert!(scheduler.is_waiting());

        // A response to the second exchange cannot resolve the first wait.
        assert!(!scheduler.handle_frame(&response(2, 0), now, &mut exec));
        assert_eq!(exec.log, ["send:1"]);

        assert!(scheduler.handle_frame(&response(1, 0), now, &mut exec));
        assert_eq!(exec.log, ["send:1", "run:first+frame", "send:2"]);
        assert!(scheduler.handle_frame(&response(2, 0), now, &mut exec));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_retry_budget_then_timeout_once() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let mut now = Instant::now();
        scheduler.enqueue(
            vec![
                send(7),
                Command::Wait(wait(7).on_success("ok").on_timeout("gave-up")),
            ],
            None,
        );
        scheduler.enqueue(vec![Command::Run("next")], None);
        scheduler.run(now, &mut exec);

        for _ in 0..3 {
            // Early ticks do nothing.
            scheduler.handle_timeout(now, &mut exec);
            now += DEFAULT_WAIT_TIMEOUT;
            scheduler.handle_timeout(now, &mut exec);
        }
        assert_eq!(
            exec.log,
            ["send:7", "resend:7", "resend:7", "run:gave-up", "run:next"]
        );
        assert!(scheduler.is_idle());

        // Nothing further fires.
        now += EXTENDED_WAIT_TIMEOUT;
        scheduler.handle_timeout(now, &mut exec);
        assert_eq!(exec.log.len(), 5);
    }

    #[test]
    fn test_extended_timeout() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();
        scheduler.enqueue(vec![send(1), Command::Wait(wait(1).extended(true))], None);
        scheduler.run(now, &mut exec);
        assert_eq!(scheduler.deadline(), Some(now + EXTENDED_WAIT_TIMEOUT));
        scheduler.handle_timeout(now + DEFAULT_WAIT_TIMEOUT, &mut exec);
        assert_eq!(exec.log, ["send:1"]);
    }

    #[test]
    fn test_retry_preempts_queued_work() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();
        scheduler.enqueue(vec![send(1), Command::Wait(wait(1))], None);
        scheduler.enqueue(vec![Command::Run("queued")], None);
        scheduler.run(now, &mut exec);
        scheduler.handle_timeout(now + DEFAULT_WAIT_TIMEOUT, &mut exec);
        assert_eq!(exec.log, ["send:1", "resend:1"]);
    }

    #[test]
    fn test_transmit_failure_abandons_exchange() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder {
            fail_frame: Some(1),
            ..Recorder::default()
        };
        scheduler.enqueue(
            vec![send(1), Command::Wait(wait(1).on_timeout("abandoned"))],
            None,
        );
        scheduler.enqueue(vec![send(2), Command::Wait(wait(2))], None);
        scheduler.run(Instant::now(), &mut exec);
        assert_eq!(exec.log, ["run:abandoned", "send:2"]);
        assert!(scheduler.is_waiting());
    }

    #[test]
    fn test_wait_without_own_send_does_not_resend() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();
        scheduler.enqueue(vec![send(4)], None);
        scheduler.enqueue(vec![Command::Wait(wait(5).retry_max(2))], None);
        scheduler.run(now, &mut exec);
        assert!(scheduler.outstanding_frame().is_none());

        scheduler.handle_timeout(now + DEFAULT_WAIT_TIMEOUT, &mut exec);
        assert_eq!(exec.log, ["send:4"]);
        assert!(scheduler.is_waiting());
    }

    #[test]
    fn test_retry_resends_the_paired_frame() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();
        scheduler.enqueue(vec![send(1), Command::Wait(wait(1))], None);
        scheduler.run(now, &mut exec);
        // Urgent work lands while the exchange is outstanding.
        scheduler.enqueue(vec![send(9)], Some(0));

        scheduler.handle_timeout(now + DEFAULT_WAIT_TIMEOUT, &mut exec);
        assert_eq!(exec.log, ["send:1", "send:9", "resend:1"]);
        assert_eq!(scheduler.outstanding_frame().map(frame_id), Some(1));
    }

    #[test]
    fn test_abandon_outstanding_runs_timeout_once() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();
        scheduler.enqueue(
            vec![send(3), Command::Wait(wait(3).on_timeout("lost"))],
            None,
        );
        scheduler.enqueue(vec![Command::Run("next")], None);
        scheduler.run(now, &mut exec);

        scheduler.abandon_outstanding(now, &mut exec);
        assert_eq!(exec.log, ["send:3", "run:lost", "run:next"]);
        assert!(scheduler.is_idle());
        scheduler.handle_timeout(now + EXTENDED_WAIT_TIMEOUT, &mut exec);
        assert_eq!(exec.log.len(), 3);
    }

    #[test]
    fn test_send_on_success_requires_success_status() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        let now = Instant::now();

        scheduler.enqueue(
            vec![
                send(1),
                Command::Wait(wait(1).send_on_success(vec![Command::Run("follow-up")])),
            ],
            None,
        );
        scheduler.run(now, &mut exec);
        scheduler.handle_frame(&response(1, 1), now, &mut exec);
        assert_eq!(exec.log, ["send:1"]);

        scheduler.enqueue(
            vec![
                send(2),
                Command::Wait(wait(2).send_on_success(vec![Command::Run("follow-up")])),
            ],
            None,
        );
        scheduler.run(now, &mut exec);
        scheduler.handle_frame(&response(2, 0), now, &mut exec);
        assert_eq!(exec.log, ["send:1", "send:2", "run:follow-up"]);
    }

    #[test]
    fn test_complete_write() {
        let mut scheduler = Scheduler::default();
        let mut exec = Recorder::default();
        scheduler.enqueue(
            vec![Command::CompleteWrite(WriteTarget {
                addr64: NetworkAddress64::new(1),
                property: "on".into(),
            })],
            None,
        );
        scheduler.run(Instant::now(), &mut exec);
        assert_eq!(exec.log, ["write:on"]);
    }

    #[test]
    fn test_matcher_discriminators() {
        use crate::protocol::zcl::{ZclCommand, ZclFrame};
        use crate::protocol::{NetworkAddress16, Source};

        let addr64 = NetworkAddress64::new(0xAA);
        let frame = InboundFrame::Application {
            source: Source {
                addr64,
                addr16: NetworkAddress16::new(0x1234),
                endpoint: 1,
            },
            profile_id: 0x0104,
            cluster_id: 0x0006,
            frame: ZclFrame::global(9, ZclCommand::ReadAttributes(vec![])),
        };
        assert!(FrameMatcher::application(addr64, 1, 0x0006, 9).matches(&frame));
        assert!(!FrameMatcher::application(addr64, 2, 0x0006, 9).matches(&frame));
        assert!(!FrameMatcher::application(addr64, 1, 0x0008, 9).matches(&frame));
        assert!(!FrameMatcher::application(addr64, 1, 0x0006, 8).matches(&frame));
        let other = FrameMatcher::application(NetworkAddress64::new(0xBB), 1, 0x0006, 9);
        assert!(!other.matches(&frame));
        assert!(!FrameMatcher::application(addr64, 1, 0x0006, 9).command(0x0B).matches(&frame));
        assert!(!FrameMatcher::local(9).matches(&frame));
    }
}
