use super::{CallState, Coordinator};
use crate::error::CallError;
use crate::types::RoomId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

enum Command {
    OpenMedia(oneshot::Sender<Result<(), CallError>>),
    StartCall(oneshot::Sender<Result<RoomId, CallError>>),
    JoinCall(RoomId, oneshot::Sender<Result<(), CallError>>),
    Hangup(oneshot::Sender<()>),
    State(oneshot::Sender<CallState>),
}

enum Next {
    Command(Option<Command>),
    Event(super::session::SessionEvent),
}

/// Cloneable front end of a coordinator running on its own task
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl Coordinator {
    /// Moves the coordinator onto a task. The task hangs up and exits once
    /// every handle is dropped.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx));
        (CoordinatorHandle { commands: tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let next = tokio::select! {
                cmd = commands.recv() => Next::Command(cmd),
                Some(event) = self.events_rx.recv() => Next::Event(event),
            };
            match next {
                Next::Command(Some(cmd)) => self.execute(cmd).await,
                Next::Command(None) => {
                    debug!("All coordinator handles dropped");
                    self.hangup().await;
                    break;
                }
                Next::Event(event) => self.handle_event(event).await,
            }
        }
        info!("Coordinator task stopped");
    }

    async fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::OpenMedia(reply) => {
                let _ = reply.send(self.open_media().await);
            }
            Command::StartCall(reply) => {
                let _ = reply.send(self.start_call().await);
            }
            Command::JoinCall(room, reply) => {
                let _ = reply.send(self.join_call(&room).await);
            }
            Command::Hangup(reply) => {
                self.hangup().await;
                let _ = reply.send(());
            }
            Command::State(reply) => {
                let _ = reply.send(self.state());
            }
        }
    }
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| CallError::CoordinatorGone)?;
        rx.await.map_err(|_| CallError::CoordinatorGone)
    }

    pub async fn open_media(&self) -> Result<(), CallError> {
        self.request(Command::OpenMedia).await?
    }

    pub async fn start_call(&self) -> Result<RoomId, CallError> {
        self.request(Command::StartCall).await?
    }

    pub async fn join_call(&self, room: RoomId) -> Result<(), CallError> {
        self.request(|tx| Command::JoinCall(room, tx)).await?
    }

    pub async fn hangup(&self) -> Result<(), CallError> {
        self.request(Command::Hangup).await
    }

    pub async fn state(&self) -> Result<CallState, CallError> {
        self.request(Command::State).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::signaling::MemoryChannel;
    use crate::testing::{FakeMediaSource, FakeTransportFactory, RecordingUiSink};
    use std::sync::Arc;

    fn spawn_with(channel: MemoryChannel) -> (CoordinatorHandle, JoinHandle<()>, Arc<FakeMediaSource>) {
        let media = Arc::new(FakeMediaSource::default());
        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            Arc::new(channel),
            Arc::new(FakeTransportFactory::new()),
            media.clone(),
            Arc::new(RecordingUiSink::default()),
        );
        let (handle, task) = coordinator.spawn();
        (handle, task, media)
    }

    #[tokio::test]
    async fn handle_drives_call_and_hangup() {
        let channel = MemoryChannel::new();
        let (handle, _task, media) = spawn_with(channel.clone());

        let room = handle.start_call().await.unwrap();
        assert!(channel.room(&room).is_some());
        assert_eq!(handle.state().await.unwrap(), CallState::Negotiating);
        assert!(matches!(
            handle.start_call().await,
            Err(CallError::SessionAlreadyActive)
        ));

        handle.hangup().await.unwrap();
        assert_eq!(handle.state().await.unwrap(), CallState::Closed);
        assert!(channel.room(&room).is_none());
        assert_eq!(media.released(), 1);
    }

    #[tokio::test]
    async fn dropping_every_handle_hangs_up() {
        let channel = MemoryChannel::new();
        let (handle, task, media) = spawn_with(channel.clone());
        let room = handle.start_call().await.unwrap();

        drop(handle);
        task.await.unwrap();

        assert!(channel.room(&room).is_none());
        assert_eq!(media.released(), 1);
    }

    #[tokio::test]
    async fn stopped_coordinator_reports_gone() {
        let (handle, task, _) = spawn_with(MemoryChannel::new());
        task.abort();
        let _ = task.await;
        assert!(matches!(
            handle.state().await,
            Err(CallError::CoordinatorGone)
        ));
    }
}
