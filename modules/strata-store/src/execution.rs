//! Execution strategies: where dispatch work runs relative to the host
//! scheduling domain.
//!
//! Every `run_inside` of the host domain ends with a change-detection pass
//! over the whole UI. The default strategy runs dispatch computation outside
//! the domain on the client and only re-enters it to publish results.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strata_core::{Result, StoreError};
use tracing::warn;

// ---------------------------------------------------------------------------
// Scheduling domains
// ---------------------------------------------------------------------------

/// The host framework's change-detection / update-batching context.
pub trait SchedulingDomain: Send + Sync {
    /// Whether the calling code is currently running inside this domain.
    fn is_inside(&self) -> bool;

    fn run_inside(&self, work: &mut dyn FnMut());

    fn run_outside(&self, work: &mut dyn FnMut());

    /// A no-op domain never schedules anything; strategies that rely on
    /// leaving it degrade to running work in place.
    fn is_noop(&self) -> bool {
        false
    }
}

thread_local! {
    static INSIDE_HOST: Cell<bool> = const { Cell::new(false) };
}

/// Restores the thread's membership flag when a domain switch unwinds.
struct RestoreMembership(bool);

impl Drop for RestoreMembership {
    fn drop(&mut self) {
        INSIDE_HOST.set(self.0);
    }
}

/// Host scheduling domain with thread-scoped membership.
///
/// Leaving the outermost `run_inside` counts as one change-detection tick.
#[derive(Debug, Default)]
pub struct HostDomain {
    ticks: AtomicU64,
}

impl HostDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of change-detection passes triggered so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Membership of the current thread, independent of any instance.
    pub fn is_in_host_domain() -> bool {
        INSIDE_HOST.get()
    }
}

impl SchedulingDomain for HostDomain {
    fn is_inside(&self) -> bool {
        Self::is_in_host_domain()
    }

    fn run_inside(&self, work: &mut dyn FnMut()) {
        let was_inside = INSIDE_HOST.replace(true);
        let _restore = RestoreMembership(was_inside);
        work();
        if !was_inside {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn run_outside(&self, work: &mut dyn FnMut()) {
        let was_inside = INSIDE_HOST.replace(false);
        let _restore = RestoreMembership(was_inside);
        work();
    }
}

/// Domain used when the host was bootstrapped without change detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDomain;

impl SchedulingDomain for NoopDomain {
    fn is_inside(&self) -> bool {
        false
    }

    fn run_inside(&self, work: &mut dyn FnMut()) {
        work();
    }

    fn run_outside(&self, work: &mut dyn FnMut()) {
        work();
    }

    fn is_noop(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Browser,
    /// Server-side rendering. Work must stay inside the domain so the
    /// renderer waits for it.
    Server,
}

impl FromStr for Platform {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" | "client" => Ok(Platform::Browser),
            "server" => Ok(Platform::Server),
            other => Err(StoreError::Config(format!(
                "unknown platform '{other}', expected 'browser' or 'server'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Decides, per invocation, whether work runs inside or outside the host
/// scheduling domain. Use the typed [`enter`](dyn ExecutionStrategy::enter)
/// and [`leave`](dyn ExecutionStrategy::leave) helpers from call sites.
pub trait ExecutionStrategy: Send + Sync {
    fn enter_work(&self, work: &mut dyn FnMut());

    fn leave_work(&self, work: &mut dyn FnMut());
}

impl dyn ExecutionStrategy {
    /// Run the computational part of a dispatch.
    pub fn enter<T>(&self, work: impl FnOnce() -> T) -> Result<T> {
        run_once(work, |body| self.enter_work(body))
    }

    /// Run work that must be visible to the host (publishing results).
    pub fn leave<T>(&self, work: impl FnOnce() -> T) -> Result<T> {
        run_once(work, |body| self.leave_work(body))
    }
}

fn run_once<T>(work: impl FnOnce() -> T, runner: impl FnOnce(&mut dyn FnMut())) -> Result<T> {
    let mut work = Some(work);
    let mut output = None;
    let mut body = || {
        if let Some(work) = work.take() {
            output = Some(work());
        }
    };
    runner(&mut body as &mut dyn FnMut());
    output.ok_or(StoreError::WorkNotRun)
}

/// Default strategy: computation outside the domain on the client, inside on
/// the server; results always published inside.
pub struct DispatchOutsideDomainStrategy {
    domain: Arc<dyn SchedulingDomain>,
    platform: Platform,
}

impl DispatchOutsideDomainStrategy {
    pub fn new(domain: Arc<dyn SchedulingDomain>, platform: Platform) -> Self {
        if domain.is_noop() {
            warn!("No-op scheduling domain given to execution strategy; running work in place");
        }
        Self { domain, platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn run_inside_domain(&self, work: &mut dyn FnMut()) {
        if self.domain.is_inside() {
            work();
        } else {
            self.domain.run_inside(work);
        }
    }

    fn run_outside_domain(&self, work: &mut dyn FnMut()) {
        if self.domain.is_inside() {
            self.domain.run_outside(work);
        } else {
            work();
        }
    }
}

impl ExecutionStrategy for DispatchOutsideDomainStrategy {
    fn enter_work(&self, work: &mut dyn FnMut()) {
        match self.platform {
            Platform::Server => self.run_inside_domain(work),
            Platform::Browser => self.run_outside_domain(work),
        }
    }

    fn leave_work(&self, work: &mut dyn FnMut()) {
        self.run_inside_domain(work);
    }
}

/// Runs everything in place, for hosts without a scheduling domain.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutionStrategy;

impl ExecutionStrategy for NoopExecutionStrategy {
    fn enter_work(&self, work: &mut dyn FnMut()) {
        work();
    }

    fn leave_work(&self, work: &mut dyn FnMut()) {
        work();
    }
}

// ---------------------------------------------------------------------------
// EnterStrategy future
// ---------------------------------------------------------------------------

/// Polls the wrapped future through `strategy.enter`, so every step of an
/// asynchronous dispatch runs where the strategy puts computation.
pub struct EnterStrategy<T> {
    strategy: Arc<dyn ExecutionStrategy>,
    inner: BoxFuture<'static, Result<T>>,
}

impl<T> EnterStrategy<T> {
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, inner: BoxFuture<'static, Result<T>>) -> Self {
        Self { strategy, inner }
    }
}

impl<T> Future for EnterStrategy<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let inner = &mut this.inner;
        match this.strategy.enter(|| inner.as_mut().poll(cx)) {
            Ok(poll) => poll,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}
