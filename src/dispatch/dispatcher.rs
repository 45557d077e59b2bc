use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::{CompletionGuard, CompletionTracker, ErrorLog};
use crate::email::{MailSender, Message};
use crate::error::{EnqueueError, SendFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Stopped,
}

struct Job {
    attempt: Uuid,
    message: Message,
    guard: CompletionGuard,
}

enum Event {
    MessageArrived(Job, OwnedSemaphorePermit),
    ErrorReported(SendFailure),
    ShutdownRequested,
}

/// Handle to a running dispatcher. Clones share the same queue.
///
/// Dropping every handle stops the dispatcher, same as [`Mailer::shutdown`].
#[derive(Clone)]
pub struct Mailer {
    intake: mpsc::Sender<Job>,
    tracker: CompletionTracker,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<State>,
}

impl Mailer {
    /// Queues a message without waiting. The returned attempt id shows up on
    /// any failure reported for it.
    pub fn enqueue(&self, message: Message) -> Result<Uuid, EnqueueError> {
        if self.stopping() {
            return Err(EnqueueError::Stopped);
        }

        let job = self.job(message);
        let attempt = job.attempt;

        match self.intake.try_send(job) {
            Ok(()) => {
                debug!(%attempt, "Email queued");
                Ok(attempt)
            }
            Err(TrySendError::Full(_)) => Err(EnqueueError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Stopped),
        }
    }

    /// Queues a message, waiting for room in the queue if it is full.
    pub async fn enqueue_wait(&self, message: Message) -> Result<Uuid, EnqueueError> {
        if self.stopping() {
            return Err(EnqueueError::Stopped);
        }

        let job = self.job(message);
        let attempt = job.attempt;

        self.intake
            .send(job)
            .await
            .map_err(|_| EnqueueError::Stopped)?;

        debug!(%attempt, "Email queued");
        Ok(attempt)
    }

    fn job(&self, message: Message) -> Job {
        Job {
            attempt: Uuid::new_v4(),
            message,
            guard: self.tracker.track(),
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.state() == State::Stopped
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Waits until every accepted message has been sent or has failed.
    pub async fn drain(&self) {
        self.tracker.wait().await
    }

    /// Asks the dispatcher to stop. Messages already being sent carry on;
    /// messages still waiting in the queue are discarded.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Resolves once the dispatcher loop has exited.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current == State::Stopped {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct Dispatcher<L> {
    sender: MailSender,
    intake: mpsc::Receiver<Job>,
    errors: mpsc::UnboundedReceiver<SendFailure>,
    report: mpsc::UnboundedSender<SendFailure>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<State>,
    workers: Arc<Semaphore>,
    log: L,
}

impl<L: ErrorLog> Dispatcher<L> {
    /// Starts the dispatcher loop on the current runtime.
    pub fn spawn(sender: MailSender, log: L) -> Mailer {
        let queue = sender.config().queue.clone();

        let (intake_tx, intake) = mpsc::channel(queue.capacity.max(1));
        let (report, errors) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (state_tx, state) = watch::channel(State::Running);

        let dispatcher = Dispatcher {
            sender,
            intake,
            errors,
            report,
            shutdown,
            state: state_tx,
            workers: Arc::new(Semaphore::new(queue.workers.max(1))),
            log,
        };

        info!(workers = queue.workers, capacity = queue.capacity, "Mail dispatcher running");

        tokio::spawn(dispatcher.run());

        Mailer {
            intake: intake_tx,
            tracker: CompletionTracker::new(),
            shutdown: Arc::new(shutdown_tx),
            state,
        }
    }

    async fn run(mut self) {
        loop {
            match self.next_event().await {
                Event::MessageArrived(job, permit) => self.start_send(job, permit),
                Event::ErrorReported(failure) => self.log.log(&failure),
                Event::ShutdownRequested => break,
            }
        }

        self.stop();
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            biased;

            _ = self.shutdown.changed() => Event::ShutdownRequested,
            Some(failure) = self.errors.recv() => Event::ErrorReported(failure),
            job = next_job(&self.workers, &mut self.intake) => match job {
                Some((job, permit)) => Event::MessageArrived(job, permit),
                None => Event::ShutdownRequested,
            },
        }
    }

    fn start_send(&self, job: Job, permit: OwnedSemaphorePermit) {
        let Job { attempt, message, guard } = job;

        let sender = self.sender.clone();
        let report = self.report.clone();
        let span = tracing::info_span!(
            "send",
            %attempt,
            to = %message.to,
            template = %message.template_name()
        );

        tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = guard;

                if let Err(error) = sender.send(&message).await {
                    let failure = SendFailure {
                        attempt,
                        to: message.to.clone(),
                        template: message.template_name().to_string(),
                        error,
                    };

                    if let Err(unreported) = report.send(failure) {
                        tracing::error!("Failed to send email after dispatcher stopped: {}", unreported.0);
                    }
                }
            }
            .instrument(span),
        );
    }

    fn stop(&mut self) {
        self.intake.close();
        while let Ok(job) = self.intake.try_recv() {
            warn!(attempt = %job.attempt, to = %job.message.to, "Discarding queued email on shutdown");
        }

        while let Ok(failure) = self.errors.try_recv() {
            self.log.log(&failure);
        }

        self.state.send_replace(State::Stopped);
        info!("Mail dispatcher stopped");
    }
}

/// Waits for a free worker, then for the next queued message.
async fn next_job(
    workers: &Arc<Semaphore>,
    intake: &mut mpsc::Receiver<Job>,
) -> Option<(Job, OwnedSemaphorePermit)> {
    let permit = workers.clone().acquire_owned().await.ok()?;
    let job = intake.recv().await?;
    Some((job, permit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MailError;
    use crate::testing::{config, eventually, write_templates, CollectingLog, RecordingTransport};
    use crate::email::CssInliner;
    use crate::templates::EmailTemplates;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn start(
        templates: &Path,
        transport: RecordingTransport,
        workers: usize,
        capacity: usize,
    ) -> (Mailer, CollectingLog) {
        let sender = MailSender::new(
            Arc::new(config(templates, workers, capacity)),
            EmailTemplates::new(templates),
            CssInliner::new(),
            Arc::new(transport),
        );
        let log = CollectingLog::default();
        (Dispatcher::spawn(sender, log.clone()), log)
    }

    async fn drained(mailer: &Mailer) {
        tokio::time::timeout(Duration::from_secs(5), mailer.drain())
            .await
            .expect("sends should finish");
    }

    #[tokio::test]
    async fn test_default_template_and_sender() {
        let (dir, transport) = (write_templates(), RecordingTransport::new());
        let (mailer, log) = start(dir.path(), transport.clone(), 4, 16);

        mailer
            .enqueue(Message::new("ann@example.com", "Welcome").with_data(json!({"name": "Ann"})))
            .unwrap();
        drained(&mailer).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "noreply@example.com");
        assert!(sent[0].raw.contains("Example"));
        assert!(sent[0].raw.contains("Hello Ann"));
        assert!(log.failures().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_reported_and_loop_continues() {
        let (dir, transport) = (write_templates(), RecordingTransport::new());
        let (mailer, log) = start(dir.path(), transport.clone(), 4, 16);

        let attempt = mailer
            .enqueue(Message::new("ann@example.com", "Hi").with_template("does-not-exist"))
            .unwrap();
        drained(&mailer).await;
        assert_eq!(mailer.in_flight(), 0);

        assert!(eventually(|| log.failures().len() == 1).await);
        let failure = &log.failures()[0];
        assert_eq!(failure.attempt, attempt);
        assert_eq!(failure.to, "ann@example.com");
        assert_eq!(failure.template, "does-not-exist");
        assert!(matches!(failure.error, MailError::TemplateNotFound(_)));

        mailer
            .enqueue(Message::new("bob@example.com", "Hi").with_data(json!({"name": "Bob"})))
            .unwrap();
        drained(&mailer).await;

        assert_eq!(transport.sent().len(), 1);
        assert_eq!(mailer.state(), State::Running);
        assert_eq!(mailer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_messages_do_not_share_state() {
        let (dir, transport) = (write_templates(), RecordingTransport::new());
        let (mailer, log) = start(dir.path(), transport.clone(), 4, 16);

        mailer
            .enqueue(Message::new("ann@example.com", "For Ann").with_data(json!({"name": "Ann"})))
            .unwrap();
        mailer
            .enqueue(Message::new("bob@example.com", "For Bob").with_data(json!({"name": "Bob"})))
            .unwrap();
        drained(&mailer).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);

        let ann = sent.iter().find(|s| s.to == vec!["ann@example.com"]).unwrap();
        let bob = sent.iter().find(|s| s.to == vec!["bob@example.com"]).unwrap();

        assert!(ann.raw.contains("Subject: For Ann") && ann.raw.contains("Hello Ann"));
        assert!(!ann.raw.contains("Hello Bob") && !ann.raw.contains("For Bob"));
        assert!(bob.raw.contains("Subject: For Bob") && bob.raw.contains("Hello Bob"));
        assert!(!bob.raw.contains("Hello Ann") && !bob.raw.contains("For Ann"));
        assert!(log.failures().is_empty());
    }

    #[tokio::test]
    async fn test_every_message_completes_once() {
        let dir = write_templates();
        let transport = RecordingTransport::delayed(Duration::from_millis(5));
        let (mailer, log) = start(dir.path(), transport.clone(), 3, 64);

        for i in 0..20 {
            let message = if i % 4 == 0 {
                Message::new(format!("user{}@example.com", i), "Hi").with_template("missing")
            } else {
                Message::new(format!("user{}@example.com", i), "Hi").with_data(json!({"name": i}))
            };
            mailer.enqueue(message).unwrap();
        }
        drained(&mailer).await;

        assert_eq!(mailer.in_flight(), 0);
        assert_eq!(transport.sent().len(), 15);
        assert!(eventually(|| log.failures().len() == 5).await);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_senders() {
        let dir = write_templates();
        let transport = RecordingTransport::gated();
        let (mailer, _log) = start(dir.path(), transport.clone(), 4, 16);

        for name in ["a", "b", "c"] {
            mailer
                .enqueue(Message::new(format!("{}@example.com", name), "Hi").with_data(json!({"name": name})))
                .unwrap();
        }
        assert!(eventually(|| transport.connects() == 3).await);

        mailer.shutdown();
        tokio::time::timeout(Duration::from_secs(1), mailer.stopped())
            .await
            .expect("dispatcher should stop while sends are blocked");

        assert_eq!(mailer.state(), State::Stopped);
        assert_eq!(mailer.in_flight(), 3);
        assert_eq!(
            mailer.enqueue(Message::new("late@example.com", "Hi")).unwrap_err(),
            EnqueueError::Stopped
        );

        transport.release(3);
        drained(&mailer).await;
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let dir = write_templates();
        let transport = RecordingTransport::gated();
        let (mailer, _log) = start(dir.path(), transport.clone(), 1, 1);
        let message = || Message::new("ann@example.com", "Hi").with_data(json!({"name": "Ann"}));

        mailer.enqueue(message()).unwrap();
        assert!(eventually(|| transport.connects() == 1).await);

        mailer.enqueue(message()).unwrap();
        assert_eq!(mailer.enqueue(message()).unwrap_err(), EnqueueError::QueueFull);
        assert_eq!(mailer.in_flight(), 2);

        let waiting = {
            let mailer = mailer.clone();
            tokio::spawn(async move { mailer.enqueue_wait(message()).await })
        };

        transport.release(3);
        assert!(waiting.await.unwrap().is_ok());
        drained(&mailer).await;
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_queued_messages_discarded_on_shutdown() {
        let dir = write_templates();
        let transport = RecordingTransport::gated();
        let (mailer, _log) = start(dir.path(), transport.clone(), 1, 8);
        let message = || Message::new("ann@example.com", "Hi").with_data(json!({"name": "Ann"}));

        mailer.enqueue(message()).unwrap();
        assert!(eventually(|| transport.connects() == 1).await);
        mailer.enqueue(message()).unwrap();
        mailer.enqueue(message()).unwrap();
        assert_eq!(mailer.in_flight(), 3);

        mailer.shutdown();
        mailer.stopped().await;
        assert_eq!(mailer.in_flight(), 1);

        transport.release(1);
        drained(&mailer).await;
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn test_dropping_every_handle_stops_dispatcher() {
        let dir = write_templates();
        let (mailer, _log) = start(dir.path(), RecordingTransport::new(), 2, 4);
        let other = mailer.clone();
        let mut state = mailer.state.clone();

        drop(mailer);
        drop(other);

        tokio::time::timeout(Duration::from_secs(5), async {
            while *state.borrow_and_update() != State::Stopped {
                if state.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("dispatcher should stop once every handle is gone");

        assert_eq!(*state.borrow(), State::Stopped);
    }
}
