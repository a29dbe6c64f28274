//! The single-threaded event loop that owns every piece of mutable state
//! ("no locks on the catalogue or the local printer view;
//! exclusion is provided by the loop itself"). Every other task — the
//! discovery sources, the timer wheel, the signal watcher — only ever
//! talks to this loop by sending a [`DaemonEvent`] down an `mpsc` channel;
//! none of them touch the catalogue or local view directly.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::allow::AllowListMatcher;
use crate::broadcaster::Broadcaster;
use crate::catalogue::{Catalogue, EntryStatus, RemotePrinterEntry, ServiceIdentity};
use crate::clock::{Clock, TimerId, TimerWheel};
use crate::config::{AppConfig, AutoShutdown, BrowseProtocol};
use crate::discovery::{broadcast, mdns, poll};
use crate::errors::Result;
use crate::intake::{self, IntakeEvent};
use crate::local_view::LocalPrinterView;
use crate::netif::NetifTracker;
use crate::print_service::PrintServiceClient;
use crate::reconciler::Reconciler;

/// Everything that can arrive on the loop's single inbound channel. Every
/// producer (discovery sources, the timer wheel, the signal watcher) is a
/// plain `tokio::spawn`ed task that only ever sends these; the loop is the
/// only thing that reads the catalogue or local view.
#[derive(Debug)]
pub enum DaemonEvent {
    Intake(IntakeEvent),
    ServiceRemoved(ServiceIdentity),
    DiscoveryUnavailable,
    DiscoveryAvailable,
    Reconcile,
    BroadcastCycle,
    NetworkChanged,
    AutoShutdownFire,
    Signal(SignalEvent),
}

#[derive(Debug, Clone, Copy)]
pub enum SignalEvent {
    Terminate,
    DisableAutoShutdown,
    EnableAutoShutdown,
}

/// The per-daemon-process context: the catalogue and every view live here
/// behind a single value threaded through every component, rather than as
/// module-level globals — there is exactly one of these per process.
pub struct Daemon {
    cfg: AppConfig,
    clock: Clock,
    catalogue: Catalogue,
    local_view: LocalPrinterView,
    netif: NetifTracker,
    allow: AllowListMatcher,
    client: Arc<dyn PrintServiceClient>,
    tx: UnboundedSender<DaemonEvent>,
    rx: UnboundedReceiver<DaemonEvent>,
    timers: TimerWheel<DaemonEvent>,
    reconcile_timer: Option<TimerId>,
    autoshutdown_timer: Option<TimerId>,
    autoshutdown_enabled: bool,
}

impl Daemon {
    pub fn new(cfg: AppConfig, client: Arc<dyn PrintServiceClient>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = Clock::new();
        let timers = TimerWheel::new(tx.clone());
        let allow = AllowListMatcher::from_config(&cfg.browse_allow);
        let netif = NetifTracker::new(cfg.browse_port);
        let autoshutdown_enabled = matches!(cfg.autoshutdown, AutoShutdown::On | AutoShutdown::Avahi);
        Self {
            cfg,
            clock,
            catalogue: Catalogue::new(),
            local_view: LocalPrinterView::new(),
            netif,
            allow,
            client,
            tx,
            rx,
            timers,
            reconcile_timer: None,
            autoshutdown_timer: None,
            autoshutdown_enabled,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Run the daemon to completion. Returns the process exit code: 0 on
    /// clean shutdown, 1 on fatal init failure.
    pub async fn run(mut self) -> Result<i32> {
        self.startup_recovery().await?;
        self.spawn_discovery_sources();
        spawn_signal_watcher(self.tx.clone());
        self.spawn_network_change_watcher();

        if self.should_broadcast_outgoing() {
            self.arm_broadcast_timer();
        }
        self.rearm_reconciler();

        loop {
            let Some(event) = self.rx.recv().await else {
                warn!("event channel closed with no shutdown signal; exiting");
                break;
            };
            if self.handle_event(event).await {
                break;
            }
        }

        Ok(0)
    }

    /// Dispatch one event. Returns true when the loop should exit.
    async fn handle_event(&mut self, event: DaemonEvent) -> bool {
        match event {
            DaemonEvent::Intake(ev) => self.handle_intake(ev).await,
            DaemonEvent::ServiceRemoved(identity) => self.handle_service_removed(identity),
            DaemonEvent::DiscoveryUnavailable => self.handle_discovery_unavailable(),
            DaemonEvent::DiscoveryAvailable => self.handle_discovery_available(),
            DaemonEvent::Reconcile => self.run_reconcile_pass().await,
            DaemonEvent::BroadcastCycle => {
                self.run_broadcast_cycle().await;
                self.arm_broadcast_timer();
            }
            DaemonEvent::NetworkChanged => {
                // Debounce: coalesce a burst of change notifications within
                // the window into a single refresh.
                if self.netif.notify_change() {
                    if let Err(e) = self.netif.refresh() {
                        warn!(error = %e, "failed to refresh network interfaces");
                    }
                }
            }
            DaemonEvent::AutoShutdownFire => {
                if self.autoshutdown_enabled && self.catalogue.is_empty() {
                    info!("catalogue empty and auto-shutdown armed; exiting");
                    return true;
                }
            }
            DaemonEvent::Signal(sig) => return self.handle_signal(sig).await,
        }
        false
    }

    async fn handle_intake(&mut self, event: IntakeEvent) {
        let now = self.now();
        match intake::intake(event, &mut self.catalogue, &mut self.local_view, self.client.as_ref(), &self.cfg, now).await
        {
            Ok(result) => {
                if let Some(reason) = result.rejected_reason {
                    debug!(reason, "intake rejected advertisement");
                } else {
                    self.rearm_reconciler();
                    self.cancel_autoshutdown_if_nonempty();
                }
            }
            Err(e) => {
                // allocation failure in intake is the one fatal
                // error kind; everything else intake can return is either
                // `Ok` with a rejection reason or a transient print-service
                // error already absorbed inside `intake()`.
                warn!(error = %e, "intake failed");
            }
        }
    }

    fn handle_service_removed(&mut self, identity: ServiceIdentity) {
        let now = self.now();
        let mut reconciler = Reconciler {
            catalogue: &mut self.catalogue,
            local_view: &mut self.local_view,
            client: self.client.as_ref(),
            cfg: &self.cfg,
        };
        reconciler.handle_remove(&identity, now, REMOVE_DELAY_SECS);
        self.rearm_reconciler();
    }

    fn handle_discovery_unavailable(&mut self) {
        if matches!(self.cfg.autoshutdown, AutoShutdown::Avahi) {
            info!("service discovery unavailable; arming auto-shutdown");
            self.autoshutdown_enabled = true;
            self.maybe_arm_autoshutdown();
        }
    }

    fn handle_discovery_available(&mut self) {
        if matches!(self.cfg.autoshutdown, AutoShutdown::Avahi) {
            info!("service discovery available again; disarming auto-shutdown");
            self.autoshutdown_enabled = false;
            self.cancel_autoshutdown();
        }
    }

    async fn handle_signal(&mut self, sig: SignalEvent) -> bool {
        match sig {
            SignalEvent::DisableAutoShutdown => {
                info!("USR1 received: disabling auto-shutdown");
                self.autoshutdown_enabled = false;
                self.cancel_autoshutdown();
                false
            }
            SignalEvent::EnableAutoShutdown => {
                info!("USR2 received: enabling auto-shutdown");
                self.autoshutdown_enabled = true;
                self.maybe_arm_autoshutdown();
                false
            }
            SignalEvent::Terminate => {
                let now = self.now();
                let count = self.catalogue.ids().len();
                for id in self.catalogue.ids() {
                    if let Some(entry) = self.catalogue.get_mut(id) {
                        entry.status = EntryStatus::Disappeared;
                        entry.deadline = Some(now);
                    }
                }
                let started = self.now();
                self.run_reconcile_pass().await;
                info!(entries = count, elapsed_secs = self.now().saturating_sub(started), "shutting down");
                true
            }
        }
    }

    async fn run_reconcile_pass(&mut self) {
        let now = self.now();
        let next_deadline = {
            let mut reconciler = Reconciler {
                catalogue: &mut self.catalogue,
                local_view: &mut self.local_view,
                client: self.client.as_ref(),
                cfg: &self.cfg,
            };
            reconciler.run_pass(now).await
        };

        if let Some(id) = self.reconcile_timer.take() {
            self.timers.cancel(id);
        }
        let delay = next_deadline.map(|d| d.saturating_sub(now) as i64);
        if let Some(delay) = delay {
            self.reconcile_timer = Some(self.timers.schedule_after(delay, DaemonEvent::Reconcile));
        }

        if self.catalogue.is_empty() {
            self.maybe_arm_autoshutdown();
        }
    }

    /// Re-arm the reconciler so it fires at the catalogue's minimum future
    /// deadline, replacing any timer already scheduled — at most one
    /// reconciler timer may be outstanding at any point.
    fn rearm_reconciler(&mut self) {
        if let Some(id) = self.reconcile_timer.take() {
            self.timers.cancel(id);
        }
        let now = self.now();
        if let Some(deadline) = self.catalogue.next_deadline() {
            let delay = deadline.saturating_sub(now) as i64;
            self.reconcile_timer = Some(self.timers.schedule_after(delay, DaemonEvent::Reconcile));
        }
    }

    fn maybe_arm_autoshutdown(&mut self) {
        if self.autoshutdown_enabled && self.catalogue.is_empty() && self.autoshutdown_timer.is_none() {
            info!(timeout = self.cfg.autoshutdown_timeout_secs, "catalogue empty; arming auto-shutdown timer");
            self.autoshutdown_timer =
                Some(self.timers.schedule_after(self.cfg.autoshutdown_timeout_secs as i64, DaemonEvent::AutoShutdownFire));
        }
    }

    fn cancel_autoshutdown(&mut self) {
        if let Some(id) = self.autoshutdown_timer.take() {
            self.timers.cancel(id);
        }
    }

    /// Any intake that grows the catalogue cancels a pending shutdown.
    fn cancel_autoshutdown_if_nonempty(&mut self) {
        if !self.catalogue.is_empty() {
            self.cancel_autoshutdown();
        }
    }

    fn should_broadcast_outgoing(&self) -> bool {
        self.cfg.browse_local_protocols.contains(&BrowseProtocol::Cups)
    }

    fn arm_broadcast_timer(&mut self) {
        self.timers.schedule_after(self.cfg.browse_interval_secs as i64, DaemonEvent::BroadcastCycle);
    }

    async fn run_broadcast_cycle(&mut self) {
        match Broadcaster::bind().await {
            Ok(b) => b.run_cycle(&mut self.netif, self.client.as_ref(), &self.cfg).await,
            Err(e) => warn!(error = %e, "failed to bind broadcast socket for outgoing cycle"),
        }
    }

    /// Startup recovery : queues the daemon itself created in a
    /// prior session are retired unless re-confirmed by fresh discovery.
    async fn startup_recovery(&mut self) -> Result<()> {
        self.local_view.refresh(self.client.as_ref()).await?;
        let now = self.now();
        let legacy_broadcast_configured = self.cfg.browse_remote_protocols.contains(&BrowseProtocol::Cups)
            || self.cfg.browse_local_protocols.contains(&BrowseProtocol::Cups);
        let deadline_offset =
            if legacy_broadcast_configured { self.cfg.browse_timeout_secs } else { self.cfg.confirm_secs };

        let owned: Vec<(String, String)> = self
            .local_view
            .iter()
            .filter(|(_, e)| e.daemon_controlled)
            .map(|(name, e)| (name.clone(), e.device_uri.clone()))
            .collect();

        for (name, uri) in owned {
            info!(printer = %name, "recovering daemon-owned queue from prior session");
            self.catalogue.insert(RemotePrinterEntry {
                name,
                uri,
                host: String::new(),
                identity: ServiceIdentity::default(),
                status: EntryStatus::Unconfirmed,
                deadline: Some(now + deadline_offset),
                duplicate: false,
                description_source: crate::catalogue::DescriptionSource::Raw,
                capability_hints: None,
            });
        }
        Ok(())
    }

    fn spawn_discovery_sources(&self) {
        if self.cfg.browse_remote_protocols.contains(&BrowseProtocol::DnsSd) {
            let tx = self.tx.clone();
            tokio::spawn(mdns::run(tx));
        }
        if self.cfg.browse_remote_protocols.contains(&BrowseProtocol::Cups) {
            let tx = self.tx.clone();
            let allow = self.allow.clone();
            let port = self.cfg.browse_port;
            tokio::spawn(async move {
                if let Err(e) = broadcast::run(port, allow, tx).await {
                    warn!(error = %e, "broadcast listener failed to bind; incoming legacy broadcast disabled");
                }
            });
        }
        for server in &self.cfg.browse_poll {
            let tx = self.tx.clone();
            let server = server.clone();
            let interval = std::time::Duration::from_secs(self.cfg.browse_interval_secs.max(1));
            tokio::spawn(poll::run(server, interval, tx));
        }
    }

    /// Stand-in for the host's network-change notifications ,
    /// which on a real system arrive from a netlink/SCNetworkReachability
    /// style API this daemon has no portable equivalent for. A tick every few
    /// seconds plays the role of "a notification arrived"; the daemon-owned
    /// `NetifTracker`'s debounce (`notify_change`) decides whether that's
    /// actually worth a re-enumeration, so a burst of ticks still collapses
    /// into one refresh.
    fn spawn_network_change_watcher(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                let _ = tx.send(DaemonEvent::NetworkChanged);
            }
        });
    }
}

/// `REMOVE = -1`: a service-discovery removal without a failover candidate
/// gets an immediate deadline rather than a literal negative one, handled
/// uniformly by the "<= now" due-check.
const REMOVE_DELAY_SECS: i64 = -1;

/// Forward SIGTERM/SIGINT/SIGUSR1/SIGUSR2 onto the loop's event channel
/// ("deliver signals as events onto the loop's queue rather than
/// running handlers on signal-delivery threads").
fn spawn_signal_watcher(tx: UnboundedSender<DaemonEvent>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut usr1 = signal(SignalKind::user_defined1()).expect("install SIGUSR1 handler");
            let mut usr2 = signal(SignalKind::user_defined2()).expect("install SIGUSR2 handler");
            loop {
                tokio::select! {
                    _ = term.recv() => { let _ = tx.send(DaemonEvent::Signal(SignalEvent::Terminate)); break; }
                    _ = int.recv() => { let _ = tx.send(DaemonEvent::Signal(SignalEvent::Terminate)); break; }
                    _ = usr1.recv() => { let _ = tx.send(DaemonEvent::Signal(SignalEvent::DisableAutoShutdown)); }
                    _ = usr2.recv() => { let _ = tx.send(DaemonEvent::Signal(SignalEvent::EnableAutoShutdown)); }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(DaemonEvent::Signal(SignalEvent::Terminate));
        }
    });
}
