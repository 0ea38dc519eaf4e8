//! # Result Bus Module / 结果总线模块
//!
//! A bus binds one host-side [`Listener`] and relays every message published
//! on it, in publish order. Its message type is validated against the
//! boundary rules when the bus is built, before anything crosses.
//!
//! 总线绑定一个宿主端的 [`Listener`]，并按发布顺序中继发布到其上的每条消息。
//! 其消息类型在构建总线时按边界规则进行验证，早于任何跨边界调用。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::boundary::{Described, ensure_transferable};
use crate::core::error::RunnerError;
use crate::core::models::{AssemblyInfo, AssemblyResult, CaseResult, ResultEvent};
use crate::execution::context::{CallbackSink, RemoteRef};
use crate::reflect::{MethodMetadata, TypeMetadata};

/// Host bus tokens count down from the top; proxy tokens count up from one.
static NEXT_BUS: AtomicU64 = AtomicU64::new(u64::MAX);

/// Receives run events on the host. Only `case_completed` is required.
pub trait Listener {
    fn assembly_started(&mut self, _assembly: &AssemblyInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn case_completed(&mut self, result: &CaseResult) -> anyhow::Result<()>;

    fn assembly_completed(&mut self, _result: &AssemblyResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The listener's boundary interface, as seen from inside a context.
pub fn listener_interface() -> TypeMetadata {
    TypeMetadata::new(concat!(module_path!(), "::Listener"))
        .method(MethodMetadata::new("", "assembly_started").parameter("assembly", AssemblyInfo::type_ref()))
        .method(MethodMetadata::new("", "case_completed").parameter("result", CaseResult::type_ref()))
        .method(
            MethodMetadata::new("", "assembly_completed").parameter("result", AssemblyResult::type_ref()),
        )
}

/// A value a bus can carry.
pub trait Message: Described + Serialize + DeserializeOwned + Send + 'static {
    fn deliver(self, listener: &mut dyn Listener) -> anyhow::Result<()>;
}

impl Message for ResultEvent {
    fn deliver(self, listener: &mut dyn Listener) -> anyhow::Result<()> {
        match self {
            ResultEvent::AssemblyStarted(assembly) => listener.assembly_started(&assembly),
            ResultEvent::CaseCompleted(result) => listener.case_completed(&result),
            ResultEvent::AssemblyCompleted(result) => listener.assembly_completed(&result),
        }
    }
}

/// A result bus bound to one listener.
/// 绑定到一个监听器的结果总线。
pub struct Bus<'l, M: Message> {
    listener: Option<&'l mut dyn Listener>,
    remote_ref: RemoteRef,
    published: usize,
    _message: PhantomData<fn(M)>,
}

impl<'l, M: Message> Bus<'l, M> {
    /// Binds `listener`. Fails if `M` cannot cross the isolation boundary.
    pub fn new(listener: &'l mut dyn Listener) -> Result<Self, RunnerError> {
        ensure_transferable::<M>("message type for bus")?;
        let remote_ref = RemoteRef(NEXT_BUS.fetch_sub(1, Ordering::Relaxed));
        tracing::debug!(bus = ?remote_ref, message = %M::type_ref(), "result bus opened");
        Ok(Self {
            listener: Some(listener),
            remote_ref,
            published: 0,
            _message: PhantomData,
        })
    }

    /// Delivers `message` to the listener before returning.
    pub fn publish(&mut self, message: M) -> Result<(), RunnerError> {
        let Some(listener) = self.listener.as_deref_mut() else {
            return Err(RunnerError::BusClosed);
        };
        message
            .deliver(listener)
            .map_err(|e| RunnerError::ListenerDelivery(format!("{e:#}")))?;
        self.published += 1;
        Ok(())
    }

    /// Releases the listener. Idempotent.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!(bus = ?self.remote_ref, published = self.published, "result bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    /// The token a context uses to address this bus.
    pub fn remote_ref(&self) -> RemoteRef {
        self.remote_ref
    }

    /// Messages delivered so far.
    pub fn published(&self) -> usize {
        self.published
    }
}

impl<M: Message> Drop for Bus<'_, M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M: Message> CallbackSink for Bus<'_, M> {
    fn remote_ref(&self) -> RemoteRef {
        self.remote_ref
    }

    fn deliver(&mut self, payload: &str) -> Result<(), RunnerError> {
        let message: M = serde_json::from_str(payload)?;
        self.publish(message)
    }
}

/// Stores every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Vec<ResultEvent>,
}

impl RecordingListener {
    pub fn events(&self) -> &[ResultEvent] {
        &self.events
    }

    pub fn cases(&self) -> impl Iterator<Item = &CaseResult> {
        self.events.iter().filter_map(|event| match event {
            ResultEvent::CaseCompleted(case) => Some(case),
            _ => None,
        })
    }

    pub fn assembly(&self) -> Option<&AssemblyResult> {
        self.events.iter().find_map(|event| match event {
            ResultEvent::AssemblyCompleted(result) => Some(result),
            _ => None,
        })
    }

    pub fn into_events(self) -> Vec<ResultEvent> {
        self.events
    }
}

impl Listener for RecordingListener {
    fn assembly_started(&mut self, assembly: &AssemblyInfo) -> anyhow::Result<()> {
        self.events.push(ResultEvent::AssemblyStarted(assembly.clone()));
        Ok(())
    }

    fn case_completed(&mut self, result: &CaseResult) -> anyhow::Result<()> {
        self.events.push(ResultEvent::CaseCompleted(result.clone()));
        Ok(())
    }

    fn assembly_completed(&mut self, result: &AssemblyResult) -> anyhow::Result<()> {
        self.events.push(ResultEvent::AssemblyCompleted(result.clone()));
        Ok(())
    }
}
