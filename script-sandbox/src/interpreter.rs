//! One embedded QuickJS instance and the operations the coordinator runs on it.
//!
//! An [`Interpreter`] is owned by exactly one thread. It is never handed out
//! of the crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rquickjs::convert::Coerced;
use rquickjs::context::EvalOptions;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Object, Persistent, Runtime};
use serde::Deserialize;
use serde_json::Value;
use tool_primitives::ProxyId;
use tracing::debug;

use crate::callbacks::{self, HostEnv};
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::executor::ResultType;

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Settled {
    Ok {
        #[serde(rename = "type")]
        kind: ResultType,
        value: Value,
    },
    Unserializable(String),
    Pending,
}

/// Deadline shared with the runtime's interrupt handler.
struct Watchdog {
    epoch: Instant,
    deadline_nanos: AtomicU64,
    tripped: AtomicBool,
}

impl Watchdog {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            deadline_nanos: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    fn arm(&self, deadline: Option<Instant>) {
        self.tripped.store(false, Ordering::Release);
        let nanos = deadline.map_or(0, |deadline| {
            let offset = deadline.saturating_duration_since(self.epoch).as_nanos();
            u64::try_from(offset).unwrap_or(u64::MAX).max(1)
        });
        self.deadline_nanos.store(nanos, Ordering::Release);
    }

    fn disarm(&self) {
        self.deadline_nanos.store(0, Ordering::Release);
    }

    fn expired(&self) -> bool {
        let deadline = self.deadline_nanos.load(Ordering::Acquire);
        if deadline == 0 {
            return false;
        }
        let now = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        if now >= deadline {
            self.tripped.store(true, Ordering::Release);
            return true;
        }
        false
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}

/// A QuickJS runtime and context with the host surface installed.
pub(crate) struct Interpreter {
    // Declared first so it is released before the runtime that owns it.
    bridge: Option<Persistent<Object<'static>>>,
    context: Context,
    runtime: Runtime,
    watchdog: Arc<Watchdog>,
    timeout: Option<Duration>,
}

impl Interpreter {
    /// Creates a runtime with the configured memory and stack limits.
    pub(crate) fn new(config: &SandboxConfig) -> SandboxResult<Self> {
        let runtime = Runtime::new().map_err(SandboxError::interpreter)?;
        if let Some(bytes) = config.memory_limit() {
            runtime.set_memory_limit(bytes);
        }
        if let Some(bytes) = config.max_stack_size() {
            runtime.set_max_stack_size(bytes);
        }
        let watchdog = Arc::new(Watchdog::new());
        let handler_watchdog = Arc::clone(&watchdog);
        runtime.set_interrupt_handler(Some(Box::new(move || handler_watchdog.expired())));
        let context = Context::full(&runtime).map_err(SandboxError::interpreter)?;
        Ok(Self {
            bridge: None,
            context,
            runtime,
            watchdog,
            timeout: config.timeout(),
        })
    }

    /// Installs the host surface unless already done. Returns `true` when
    /// this call performed the installation.
    pub(crate) fn ensure_callbacks(&mut self, env: &HostEnv) -> SandboxResult<bool> {
        if self.bridge.is_some() {
            return Ok(false);
        }
        let bridge = self.context.with(|ctx| {
            callbacks::install(&ctx, env)
                .map(|bridge| Persistent::save(&ctx, bridge))
                .catch(&ctx)
                .map_err(|caught| classify(caught, &self.watchdog, self.timeout))
        })?;
        self.bridge = Some(bridge);
        debug!("installed host callbacks");
        Ok(true)
    }

    /// Binds each `(global name, proxy id)` pair to a live guest proxy.
    pub(crate) fn bind(&self, bindings: &[(String, ProxyId)]) -> SandboxResult<()> {
        self.call_bridge(|ctx, bridge| {
            let bind: Function = bridge.get("bind")?;
            for (name, id) in bindings {
                bind.call::<_, ()>((name.as_str(), id.as_str()))
                    .catch(ctx)
                    .map_err(|caught| classify(caught, &self.watchdog, self.timeout))?;
            }
            Ok(())
        })
    }

    /// Removes the given global bindings.
    pub(crate) fn unbind(&self, names: &[String]) -> SandboxResult<()> {
        self.call_bridge(|ctx, bridge| {
            let unbind: Function = bridge.get("unbind")?;
            for name in names {
                unbind
                    .call::<_, ()>((name.as_str(),))
                    .catch(ctx)
                    .map_err(|caught| classify(caught, &self.watchdog, self.timeout))?;
            }
            Ok(())
        })
    }

    /// Drops cached guest proxies for released ids.
    pub(crate) fn forget(&self, ids: &[ProxyId]) -> SandboxResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let text = serde_json::to_string(ids).map_err(SandboxError::interpreter)?;
        self.call_bridge(|ctx, bridge| {
            let forget: Function = bridge.get("forget")?;
            forget
                .call::<_, ()>((text.as_str(),))
                .catch(ctx)
                .map_err(|caught| classify(caught, &self.watchdog, self.timeout))
        })
    }

    /// Number of guest proxies currently cached in this interpreter.
    #[cfg(test)]
    pub(crate) fn cached_proxies(&self) -> SandboxResult<usize> {
        self.call_bridge(|_, bridge| {
            let cached: Function = bridge.get("cached")?;
            let size: u32 = cached.call(())?;
            Ok(usize::try_from(size).unwrap_or(usize::MAX))
        })
    }

    fn call_bridge<T>(
        &self,
        f: impl FnOnce(&Ctx<'_>, &Object<'_>) -> SandboxResult<T>,
    ) -> SandboxResult<T> {
        self.context.with(|ctx| {
            let bridge = self.restore_bridge(&ctx)?;
            f(&ctx, &bridge)
        })
    }

    fn restore_bridge<'js>(&self, ctx: &Ctx<'js>) -> SandboxResult<Object<'js>> {
        let Some(bridge) = &self.bridge else {
            return Err(SandboxError::interpreter("host callbacks are not installed"));
        };
        bridge.clone().restore(ctx).map_err(SandboxError::interpreter)
    }

    /// Sets the deadline checked by the interrupt handler.
    pub(crate) fn arm(&self, deadline: Option<Instant>) {
        self.watchdog.arm(deadline);
    }

    /// Clears the deadline.
    pub(crate) fn disarm(&self) {
        self.watchdog.disarm();
    }

    /// Evaluates prepared source and converts its result to host values.
    ///
    /// A promise result is driven to completion before conversion.
    pub(crate) fn evaluate(&self, source: &str) -> SandboxResult<(Value, ResultType)> {
        self.context.with(|ctx| {
            let mut options = EvalOptions::default();
            options.strict = false;
            let value = ctx
                .eval_with_options::<rquickjs::Value, _>(source, options)
                .catch(&ctx)
                .map_err(|caught| classify(caught, &self.watchdog, self.timeout))?;
            let bridge = self.restore_bridge(&ctx)?;
            let settle: Function = bridge.get("settle").map_err(SandboxError::interpreter)?;
            settle
                .call::<_, ()>((value,))
                .catch(&ctx)
                .map_err(|caught| classify(caught, &self.watchdog, self.timeout))
        })?;

        self.drain_jobs();

        let text = self.context.with(|ctx| {
            let bridge = self.restore_bridge(&ctx)?;
            let take: Function = bridge.get("take").map_err(SandboxError::interpreter)?;
            take.call::<_, String>(())
                .catch(&ctx)
                .map_err(|caught| classify(caught, &self.watchdog, self.timeout))
        })?;

        match serde_json::from_str::<Settled>(&text) {
            Ok(Settled::Ok { kind, value }) => Ok((value, kind)),
            Ok(Settled::Unserializable(message)) => Err(SandboxError::Serialization { message }),
            Ok(Settled::Pending) => Err(SandboxError::Runtime {
                message: String::from("script result promise never settled"),
                stack: None,
            }),
            Err(err) => Err(SandboxError::Serialization {
                message: err.to_string(),
            }),
        }
    }

    fn drain_jobs(&self) {
        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                debug!("pending job raised");
                if self.watchdog.tripped() {
                    break;
                }
            }
        }
    }
}

impl From<rquickjs::Error> for SandboxError {
    fn from(err: rquickjs::Error) -> Self {
        Self::interpreter(err)
    }
}

fn classify(caught: CaughtError<'_>, watchdog: &Watchdog, timeout: Option<Duration>) -> SandboxError {
    if watchdog.tripped() {
        return SandboxError::Timeout {
            limit: timeout.unwrap_or_default(),
        };
    }
    match caught {
        CaughtError::Exception(exception) => {
            let name: Option<String> = exception.as_object().get("name").ok().flatten();
            let message = exception.message().unwrap_or_default();
            match name.as_deref() {
                Some("SyntaxError") => SandboxError::Syntax { message },
                Some(name) => SandboxError::Runtime {
                    message: format!("{name}: {message}"),
                    stack: exception.stack(),
                },
                None => SandboxError::Runtime {
                    message,
                    stack: exception.stack(),
                },
            }
        }
        CaughtError::Value(value) => SandboxError::Runtime {
            message: value
                .get::<Coerced<String>>()
                .map_or_else(|_| String::from("uncaught non-error value"), |text| text.0),
            stack: None,
        },
        CaughtError::Error(err) => SandboxError::interpreter(err),
    }
}
