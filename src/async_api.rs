use crate::engine::Engine;
use crate::orchestrator::{CancelToken, RenderedImage, Renderer, DEFAULT_PUMP_INTERVAL};
use crate::{Error, RenderRequest, Result};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

enum Command {
    Render(RenderRequest, CancelToken, oneshot::Sender<Result<RenderedImage>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly render queue backed by a dedicated worker thread.
///
/// The worker thread owns the engine and renders requests strictly one after
/// another, so concurrent callers never share the engine's event loop. The
/// engine itself does not need to be `Send`: it is built on the worker.
#[derive(Clone)]
pub struct RenderQueue {
    cmd_tx: Sender<Command>,
}

impl RenderQueue {
    /// Spawn the worker and build the engine on it with `factory`.
    pub async fn spawn<E, F>(factory: F) -> Result<Self>
    where
        E: Engine + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        Self::spawn_with_interval(factory, DEFAULT_PUMP_INTERVAL).await
    }

    /// Like [`RenderQueue::spawn`] with a custom pump interval.
    pub async fn spawn_with_interval<E, F>(factory: F, pump_interval: Duration) -> Result<Self>
    where
        E: Engine + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::Builder::new()
            .name("rfshot-engine".into())
            .spawn(move || {
                // Initialize engine on the worker thread
                let engine = match factory() {
                    Ok(e) => e,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));

                let renderer = Renderer::new(&engine).with_pump_interval(pump_interval);
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Render(request, cancel, resp) => {
                            let res = renderer.render_with_cancel(&request, &cancel);
                            let _ = resp.send(res);
                        }
                        Command::Close(resp) => {
                            let _ = resp.send(Ok(()));
                            break;
                        }
                    }
                }
                // engine dropped here, on the thread that created it
            })?;

        let init_res = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    /// Launch headless Chrome on the worker thread.
    #[cfg(feature = "cdp")]
    pub async fn launch(config: crate::EngineConfig) -> Result<Self> {
        Self::spawn(move || crate::cdp::CdpEngine::launch(config)).await
    }

    /// Queue a render and wait for its result.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderedImage> {
        self.render_with_cancel(request, CancelToken::new()).await
    }

    /// Queue a render that gives up once `cancel` fires. A request cancelled
    /// while still queued fails without touching the engine.
    pub async fn render_with_cancel(
        &self,
        request: RenderRequest,
        cancel: CancelToken,
    ) -> Result<RenderedImage> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Render(request, cancel, tx))
            .map_err(|_| Error::Other("render worker has shut down".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Render canceled: {}", e)))?
    }

    /// Render and encode in `request.output_format`.
    pub async fn render_to_bytes(&self, request: RenderRequest) -> Result<Vec<u8>> {
        let format = request.output_format;
        self.render(request).await?.encode(format)
    }

    /// Shut the worker down and release the engine.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}
