//! # Isolated Context Module / 隔离上下文模块
//!
//! An isolated context is a dedicated worker thread owning its own runtime,
//! its configuration, its application base and the proxies created inside it.
//! Host and context exchange serialized payloads and [`RemoteRef`] tokens
//! over channels; nothing else crosses.
//!
//! 隔离上下文是一个专用工作线程，拥有自己的运行时、配置、应用程序基目录
//! 以及在其中创建的代理。宿主与上下文之间通过通道交换序列化负载和
//! [`RemoteRef`] 令牌，除此之外没有任何东西跨越边界。
//!
//! While the host waits for a reply it services callbacks from the context,
//! so host-side listeners always run on the calling thread.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::core::convention::Convention;
use crate::core::error::{ModuleLoadError, RunnerError};
use crate::core::models::{MethodGroup, Options, ResultEvent};
use crate::core::module::{InvocationScope, ModuleLoader};
use crate::execution::proxy::{EventSink, ExecutionProxy, NullSink};
use crate::infra::config::ContextConfig;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// An opaque token naming an object that lives on the other side of the
/// boundary. Only the side that issued it can resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef(pub u64);

/// How a fresh context is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSetup {
    /// Unique per context; also the worker thread's name.
    pub application_name: String,
    /// The module's directory.
    pub application_base: PathBuf,
    pub configuration_file: Option<PathBuf>,
}

impl ContextSetup {
    pub fn new(application_base: impl Into<PathBuf>, configuration_file: Option<PathBuf>) -> Self {
        let application_name = format!(
            "isolation-runner-{}-{}-{}",
            std::process::id(),
            NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            Utc::now().timestamp_millis()
        );
        Self {
            application_name,
            application_base: application_base.into(),
            configuration_file,
        }
    }
}

/// A failure raised inside the context, in a form that can cross back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteFault {
    ModuleLoad { path: PathBuf, reason: String },
    ListenerDelivery(String),
    BusClosed,
    UnknownReference(u64),
    Marshal(String),
    /// The context was aborted while the call ran.
    Interrupted,
}

impl From<ModuleLoadError> for RemoteFault {
    fn from(e: ModuleLoadError) -> Self {
        RemoteFault::ModuleLoad {
            path: e.path,
            reason: e.reason,
        }
    }
}

impl From<serde_json::Error> for RemoteFault {
    fn from(e: serde_json::Error) -> Self {
        RemoteFault::Marshal(e.to_string())
    }
}

impl From<RemoteFault> for RunnerError {
    fn from(fault: RemoteFault) -> Self {
        match fault {
            RemoteFault::ModuleLoad { path, reason } => ModuleLoadError { path, reason }.into(),
            RemoteFault::ListenerDelivery(message) => RunnerError::ListenerDelivery(message),
            RemoteFault::BusClosed => RunnerError::BusClosed,
            RemoteFault::UnknownReference(token) => {
                RunnerError::Marshal(format!("unknown remote reference {token}"))
            }
            RemoteFault::Marshal(message) => RunnerError::Marshal(message),
            RemoteFault::Interrupted => RunnerError::ContextTerminated,
        }
    }
}

impl From<RunnerError> for RemoteFault {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::ListenerDelivery(message) => RemoteFault::ListenerDelivery(message),
            RunnerError::BusClosed => RemoteFault::BusClosed,
            RunnerError::Marshal(message) => RemoteFault::Marshal(message),
            RunnerError::ModuleLoad(e) => e.into(),
            RunnerError::ContextTerminated => RemoteFault::Interrupted,
            other @ (RunnerError::ContextCreation { .. }
            | RunnerError::BoundarySafety(_)
            | RunnerError::ContextClosed) => RemoteFault::Marshal(other.to_string()),
        }
    }
}

/// A call on an execution proxy, serialized across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyCall {
    Discover {
        module_path: PathBuf,
        options: Options,
    },
    RunAssembly {
        module_path: PathBuf,
        options: Options,
        bus: Option<RemoteRef>,
    },
    RunMethods {
        module_path: PathBuf,
        options: Options,
        bus: Option<RemoteRef>,
        method_groups: Vec<MethodGroup>,
    },
}

enum Inbound {
    CreateProxy,
    Invoke { proxy: RemoteRef, call: String },
    Release(RemoteRef),
    Shutdown,
}

enum Outbound {
    Reply(Result<String, RemoteFault>),
    Callback { target: RemoteRef, payload: String },
}

type Ack = Result<(), RemoteFault>;

/// A host-side object that receives serialized callbacks from the context.
pub trait CallbackSink {
    fn remote_ref(&self) -> RemoteRef;

    fn deliver(&mut self, payload: &str) -> Result<(), RunnerError>;
}

/// The host's end of an isolated context.
/// 隔离上下文的宿主端。
pub struct IsolatedContext {
    setup: ContextSetup,
    inbound: Sender<Inbound>,
    outbound: Receiver<Outbound>,
    /// Dropped on shutdown so a worker waiting for an ack wakes up.
    acks: Option<Sender<Ack>>,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
    terminated: bool,
}

impl IsolatedContext {
    /// Starts the worker thread and waits until its runtime is up.
    pub fn create(
        setup: ContextSetup,
        config: ContextConfig,
        loader: Arc<dyn ModuleLoader>,
        convention: Arc<dyn Convention>,
    ) -> Result<Self, RunnerError> {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let token = CancellationToken::new();

        let worker_token = token.clone();
        let application_base = setup.application_base.clone();
        let worker = thread::Builder::new()
            .name(setup.application_name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                ContextWorker {
                    runtime,
                    application_base,
                    config,
                    token: worker_token,
                    loader,
                    convention,
                    channels: WorkerChannels {
                        inbound: inbound_rx,
                        outbound: outbound_tx,
                        acks: ack_rx,
                    },
                    proxies: HashMap::new(),
                    next_proxy: 1,
                }
                .run();
            })
            .map_err(|e| RunnerError::context_creation(&setup.application_base, e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = worker.join();
                return Err(RunnerError::context_creation(&setup.application_base, reason));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(RunnerError::context_creation(
                    &setup.application_base,
                    "context worker exited during startup",
                ));
            }
        }

        tracing::debug!(application = %setup.application_name, "isolated context started");
        Ok(Self {
            setup,
            inbound: inbound_tx,
            outbound: outbound_rx,
            acks: Some(ack_tx),
            token,
            worker: Some(worker),
            terminated: false,
        })
    }

    pub fn setup(&self) -> &ContextSetup {
        &self.setup
    }

    pub fn application_base(&self) -> &Path {
        &self.setup.application_base
    }

    /// The token that aborts this context's in-flight work.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Instantiates a new execution proxy inside the context.
    pub fn create_proxy(&mut self) -> Result<ProxyHandle<'_>, RunnerError> {
        let reply = self.call(Inbound::CreateProxy, None)?;
        let proxy = serde_json::from_str(&reply)?;
        tracing::debug!(proxy = ?proxy, "created execution proxy");
        Ok(ProxyHandle {
            context: self,
            proxy,
        })
    }

    fn call(
        &mut self,
        message: Inbound,
        mut callbacks: Option<&mut dyn CallbackSink>,
    ) -> Result<String, RunnerError> {
        if self.terminated {
            return Err(RunnerError::ContextTerminated);
        }
        if self.inbound.send(message).is_err() {
            return Err(self.mark_terminated());
        }

        loop {
            match self.outbound.recv() {
                Ok(Outbound::Reply(reply)) => return reply.map_err(RunnerError::from),
                Ok(Outbound::Callback { target, payload }) => {
                    let ack = match callbacks.as_deref_mut() {
                        Some(sink) if sink.remote_ref() == target => {
                            sink.deliver(&payload).map_err(RemoteFault::from)
                        }
                        _ => Err(RemoteFault::UnknownReference(target.0)),
                    };
                    let delivered = self.acks.as_ref().is_some_and(|acks| acks.send(ack).is_ok());
                    if !delivered {
                        return Err(self.mark_terminated());
                    }
                }
                Err(_) => return Err(self.mark_terminated()),
            }
        }
    }

    fn mark_terminated(&mut self) -> RunnerError {
        if !self.terminated {
            tracing::warn!(application = %self.setup.application_name, "isolated context terminated");
        }
        self.terminated = true;
        RunnerError::ContextTerminated
    }

    /// Stops the worker and waits for it. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // A host that unwound mid-callback left the worker waiting for an ack.
        self.acks = None;
        let _ = self.inbound.send(Inbound::Shutdown);
        if worker.join().is_err() {
            tracing::warn!(application = %self.setup.application_name, "context worker panicked");
        }
        self.terminated = true;
        tracing::debug!(application = %self.setup.application_name, "isolated context stopped");
    }
}

impl Drop for IsolatedContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A proxy inside the context. Dropping the handle releases the proxy.
pub struct ProxyHandle<'c> {
    context: &'c mut IsolatedContext,
    proxy: RemoteRef,
}

impl ProxyHandle<'_> {
    pub fn remote_ref(&self) -> RemoteRef {
        self.proxy
    }

    /// Sends `call` to the proxy and decodes its reply. Callbacks addressed
    /// to `callbacks` are delivered while waiting.
    pub fn invoke<R: DeserializeOwned>(
        &mut self,
        call: &ProxyCall,
        callbacks: Option<&mut dyn CallbackSink>,
    ) -> Result<R, RunnerError> {
        let call = serde_json::to_string(call)?;
        let reply = self.context.call(
            Inbound::Invoke {
                proxy: self.proxy,
                call,
            },
            callbacks,
        )?;
        Ok(serde_json::from_str(&reply)?)
    }
}

impl Drop for ProxyHandle<'_> {
    fn drop(&mut self) {
        // Fire and forget; a dead context has nothing left to release.
        let _ = self.context.inbound.send(Inbound::Release(self.proxy));
        tracing::debug!(proxy = ?self.proxy, "released execution proxy");
    }
}

struct WorkerChannels {
    inbound: Receiver<Inbound>,
    outbound: Sender<Outbound>,
    acks: Receiver<Ack>,
}

struct ContextWorker {
    runtime: Runtime,
    application_base: PathBuf,
    config: ContextConfig,
    token: CancellationToken,
    loader: Arc<dyn ModuleLoader>,
    convention: Arc<dyn Convention>,
    channels: WorkerChannels,
    proxies: HashMap<u64, ExecutionProxy>,
    next_proxy: u64,
}

impl ContextWorker {
    fn run(mut self) {
        while let Ok(message) = self.channels.inbound.recv() {
            // An aborted context never replies again; the host sees it vanish.
            if self.token.is_cancelled() {
                break;
            }

            match message {
                Inbound::CreateProxy => {
                    let id = self.next_proxy;
                    self.next_proxy += 1;
                    self.proxies.insert(
                        id,
                        ExecutionProxy::new(Arc::clone(&self.loader), Arc::clone(&self.convention)),
                    );
                    let reply = serde_json::to_string(&RemoteRef(id)).map_err(RemoteFault::from);
                    self.reply(reply);
                }
                Inbound::Invoke { proxy, call } => {
                    let reply = self.invoke(proxy, &call);
                    if self.token.is_cancelled() {
                        break;
                    }
                    self.reply(reply);
                }
                Inbound::Release(proxy) => {
                    self.proxies.remove(&proxy.0);
                }
                Inbound::Shutdown => break,
            }
        }
    }

    fn reply(&self, reply: Result<String, RemoteFault>) {
        let _ = self.channels.outbound.send(Outbound::Reply(reply));
    }

    fn invoke(&self, proxy: RemoteRef, call: &str) -> Result<String, RemoteFault> {
        let call: ProxyCall = serde_json::from_str(call)?;
        let Some(target) = self.proxies.get(&proxy.0) else {
            return Err(RemoteFault::UnknownReference(proxy.0));
        };

        let scope = InvocationScope {
            runtime: &self.runtime,
            application_base: &self.application_base,
            config: &self.config,
            cancellation: &self.token,
        };

        match call {
            ProxyCall::Discover {
                module_path,
                options,
            } => {
                let groups = target.discover_test_method_groups(&module_path, &options)?;
                Ok(serde_json::to_string(&groups)?)
            }
            ProxyCall::RunAssembly {
                module_path,
                options,
                bus,
            } => {
                let mut sink = event_sink(&self.channels, bus);
                let result = target.run_assembly(&module_path, &options, &scope, sink.as_mut())?;
                Ok(serde_json::to_string(&result)?)
            }
            ProxyCall::RunMethods {
                module_path,
                options,
                bus,
                method_groups,
            } => {
                let mut sink = event_sink(&self.channels, bus);
                let result =
                    target.run_methods(&module_path, &options, &method_groups, &scope, sink.as_mut())?;
                Ok(serde_json::to_string(&result)?)
            }
        }
    }
}

fn event_sink(channels: &WorkerChannels, bus: Option<RemoteRef>) -> Box<dyn EventSink + '_> {
    match bus {
        Some(target) => Box::new(RemoteBus { target, channels }),
        None => Box::new(NullSink),
    }
}

/// The context-side end of a host bus.
struct RemoteBus<'w> {
    target: RemoteRef,
    channels: &'w WorkerChannels,
}

impl EventSink for RemoteBus<'_> {
    fn publish(&mut self, event: ResultEvent) -> Result<(), RemoteFault> {
        let payload = serde_json::to_string(&event)?;
        self.channels
            .outbound
            .send(Outbound::Callback {
                target: self.target,
                payload,
            })
            .map_err(|_| RemoteFault::Interrupted)?;
        self.channels
            .acks
            .recv()
            .map_err(|_| RemoteFault::Interrupted)?
    }
}
