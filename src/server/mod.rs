//! Unix-socket protocol server and the central event loop.
//!
//! Everything runs on one thread: a current-thread tokio runtime with a
//! `LocalSet`. Client connections get two small local tasks (line reader,
//! reply writer) that talk to the control loop over channels; all decode,
//! encode, and protocol handling happens inside [`Server`] on the loop
//! itself, so no two decodes and no decode/transmit pair ever interleave.

pub mod proto;
pub mod repeat;

pub use proto::Request;
pub use repeat::ActiveRepeat;

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::{spawn_local, LocalSet};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{decode, encode, RawSample};
use crate::config;
use crate::error::{IrdError, Result};
use crate::hw::HardwareAdapter;
use crate::remote::{CodeEntry, CodeSignal, ProfileSet};

/// Longest request line accepted before the connection is dropped.
const MAX_LINE: usize = 4096;
/// Synthetic silence seeding (and flushing) the capture buffer.
const IDLE_SPACE: u32 = 1_000_000;
/// Hardware poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Sample-less polls before a partial capture is flushed as a frame.
const FLUSH_POLLS: u32 = 5;

/// Server endpoints: where to listen and what to load.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket: PathBuf,
    pub config: PathBuf,
}

/// Messages funneled from the helper tasks into the control loop.
enum ControlMsg {
    Request { client: u64, line: String },
    Disconnected { client: u64 },
    Reload,
}

/// Load profiles, bind the socket, and run until interrupted.
pub fn run(cfg: &ServerConfig, hw: Rc<dyn HardwareAdapter>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();
    local.block_on(&runtime, serve(cfg, hw))
}

async fn serve(cfg: &ServerConfig, hw: Rc<dyn HardwareAdapter>) -> Result<()> {
    let remotes = config::parse_file(&cfg.config)?;
    info!(
        remotes = remotes.len(),
        config = %cfg.config.display(),
        "configuration loaded"
    );
    let mut server = Server::new(ProfileSet::new(remotes), hw, cfg.config.clone());

    if cfg.socket.exists() {
        std::fs::remove_file(&cfg.socket)?;
    }
    let listener = UnixListener::bind(&cfg.socket)?;
    info!(socket = %cfg.socket.display(), "listening");

    let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel::<ControlMsg>();

    // SIGHUP becomes an ordinary control message, handled in sequence
    // with everything else.
    {
        let ctl = ctl_tx.clone();
        let mut hup = signal(SignalKind::hangup())?;
        spawn_local(async move {
            while hup.recv().await.is_some() {
                if ctl.send(ControlMsg::Reload).is_err() {
                    break;
                }
            }
        });
    }

    let mut poll = tokio::time::interval(POLL_INTERVAL);
    let mut next_client = 1u64;
    // Fatal errors break out with their result so the socket file is
    // unlinked on every exit path.
    let result = loop {
        let deadline = server
            .repeat_deadline()
            .map(tokio::time::Instant::from_std);
        tokio::select! {
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => break Err(e.into()),
                };
                debug!(client = next_client, "client connected");
                let tx = spawn_client(next_client, stream, ctl_tx.clone());
                server.client_connected(next_client, tx);
                next_client += 1;
            }
            Some(msg) = ctl_rx.recv() => match msg {
                ControlMsg::Request { client, line } => {
                    let reply = server.handle_line(client, &line);
                    server.send_to(client, reply);
                }
                ControlMsg::Disconnected { client } => {
                    debug!(client, "client disconnected");
                    server.client_disconnected(client);
                }
                ControlMsg::Reload => {
                    if let Err(e) = server.reload() {
                        warn!(error = %e, "reload failed, keeping previous profiles");
                    }
                }
            },
            _ = poll.tick() => {
                if let Err(e) = server.poll_hardware() {
                    break Err(e);
                }
            }
            () = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600))
            ), if deadline.is_some() => {
                server.fire_repeat();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break Ok(());
            }
        }
    };
    let _ = std::fs::remove_file(&cfg.socket);
    result
}

/// Spawn the reader/writer tasks for one connection; returns the reply
/// channel the control loop writes into.
fn spawn_client(
    id: u64,
    stream: UnixStream,
    ctl: mpsc::UnboundedSender<ControlMsg>,
) -> mpsc::UnboundedSender<String> {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    spawn_local(async move {
        while let Some(reply) = rx.recv().await {
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    spawn_local(async move {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            // Cap each read so a peer that never sends a newline cannot
            // grow the buffer without bound.
            let mut capped = (&mut reader).take(MAX_LINE as u64 + 1);
            match capped.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) if buf.len() > MAX_LINE => {
                    warn!(client = id, "dropping client: request line too long");
                    break;
                }
                Ok(_) => {
                    let Ok(line) = std::str::from_utf8(&buf) else {
                        warn!(client = id, "dropping client: request is not utf-8");
                        break;
                    };
                    let msg = ControlMsg::Request {
                        client: id,
                        line: line.to_owned(),
                    };
                    if ctl.send(msg).is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ctl.send(ControlMsg::Disconnected { client: id });
    });

    tx
}

/// All daemon state: the active profile generation, connected clients,
/// the armed repeat, and the rolling capture buffer.
pub struct Server {
    profiles: ProfileSet,
    hw: Rc<dyn HardwareAdapter>,
    config_path: PathBuf,
    clients: HashMap<u64, mpsc::UnboundedSender<String>>,
    repeat: Option<ActiveRepeat>,
    /// Profile of the previous successful decode, for the repeat fast
    /// path and repeat counting.
    last_remote: Option<String>,
    rx_buf: Vec<RawSample>,
    idle_polls: u32,
}

impl Server {
    pub fn new(profiles: ProfileSet, hw: Rc<dyn HardwareAdapter>, config_path: PathBuf) -> Self {
        Self {
            profiles,
            hw,
            config_path,
            clients: HashMap::new(),
            repeat: None,
            last_remote: None,
            // The capture starts in silence.
            rx_buf: vec![RawSample::space(IDLE_SPACE)],
            idle_polls: 0,
        }
    }

    pub fn client_connected(&mut self, id: u64, tx: mpsc::UnboundedSender<String>) {
        self.clients.insert(id, tx);
    }

    /// Connection teardown disarms a repeat owned by this client.
    pub fn client_disconnected(&mut self, id: u64) {
        self.clients.remove(&id);
        if self.repeat.as_ref().is_some_and(|r| r.owner == id) {
            info!(client = id, "repeat owner disconnected, disarming");
            self.repeat = None;
        }
    }

    pub fn send_to(&mut self, id: u64, text: String) {
        if let Some(tx) = self.clients.get(&id) {
            let _ = tx.send(text);
        }
    }

    fn broadcast(&mut self, line: &str) {
        self.clients.retain(|_, tx| tx.send(line.to_string()).is_ok());
    }

    /// Handle one request line and produce the full reply envelope.
    pub fn handle_line(&mut self, client: u64, line: &str) -> String {
        let echo = line.trim_end_matches(['\r', '\n']);
        debug!(client, request = echo, "handling request");
        match Request::parse(echo) {
            Ok(req) => match self.dispatch(client, req) {
                Ok(data) => proto::success(echo, &data),
                Err(e) => {
                    debug!(client, error = %e, "request failed");
                    proto::error(echo, &e.to_string())
                }
            },
            Err(e) => proto::error(echo, &e.to_string()),
        }
    }

    fn dispatch(&mut self, client: u64, req: Request) -> Result<Vec<String>> {
        match req {
            Request::Version => Ok(vec![crate::VERSION.to_string()]),
            Request::List { remote, button } => {
                self.cmd_list(remote.as_deref(), button.as_deref())
            }
            Request::SendOnce { remote, button } => self.cmd_send_once(&remote, &button),
            Request::SendStart { remote, button } => self.cmd_send_start(client, &remote, &button),
            Request::SendStop { remote, button } => self.cmd_send_stop(&remote, &button),
        }
    }

    fn cmd_list(&self, remote: Option<&str>, button: Option<&str>) -> Result<Vec<String>> {
        match (remote, button) {
            (None, _) => Ok(self.profiles.remotes.iter().map(|r| r.name.clone()).collect()),
            (Some(name), None) => {
                let p = self.profiles.find_or_err(name)?;
                Ok(p.codes
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{:016x} {}", listed_code(c, i), c.name))
                    .collect())
            }
            (Some(name), Some(btn)) => {
                let p = self.profiles.find_or_err(name)?;
                let i = p.entry_index(btn)?;
                Ok(vec![format!("{:016x} {}", listed_code(&p.codes[i], i), p.codes[i].name)])
            }
        }
    }

    fn cmd_send_once(&mut self, remote: &str, button: &str) -> Result<Vec<String>> {
        if !self.hw.capabilities().can_send {
            return Err(IrdError::CannotSend);
        }
        if self.repeat.as_ref().is_some_and(|r| r.remote == remote) {
            return Err(IrdError::StateConflict(format!(
                "remote '{remote}' is busy repeating"
            )));
        }
        let profile = self
            .profiles
            .find_mut(remote)
            .ok_or_else(|| IrdError::UnknownRemote {
                name: remote.to_string(),
            })?;
        let entry = profile.entry_index(button)?;
        let wf = encode(profile, entry, false)?;
        self.hw.send(&wf)?;
        debug!(remote, button, samples = wf.samples.len(), "transmitted once");
        Ok(Vec::new())
    }

    fn cmd_send_start(&mut self, client: u64, remote: &str, button: &str) -> Result<Vec<String>> {
        if !self.hw.capabilities().can_send {
            return Err(IrdError::CannotSend);
        }
        if let Some(rep) = &self.repeat {
            return Err(IrdError::StateConflict(format!(
                "already repeating {} {}",
                rep.remote, rep.button
            )));
        }
        let generation = self.profiles.generation;
        let profile = self
            .profiles
            .find_mut(remote)
            .ok_or_else(|| IrdError::UnknownRemote {
                name: remote.to_string(),
            })?;
        let entry = profile.entry_index(button)?;
        let wf = encode(profile, entry, false)?;
        self.hw.send(&wf)?;
        let rep = ActiveRepeat::arm(client, profile, entry, generation, wf.gap);
        info!(client, remote, button, "repeat armed");
        self.repeat = Some(rep);
        Ok(Vec::new())
    }

    fn cmd_send_stop(&mut self, remote: &str, button: &str) -> Result<Vec<String>> {
        let matches = self
            .repeat
            .as_ref()
            .is_some_and(|r| r.matches(remote, button));
        if !matches {
            let detail = match &self.repeat {
                Some(r) => format!("repeating {} {}, not {remote} {button}", r.remote, r.button),
                None => "nothing is repeating".to_string(),
            };
            return Err(IrdError::StateConflict(detail));
        }
        info!(remote, button, "repeat stopped");
        self.repeat = None;
        Ok(Vec::new())
    }

    /// Swap in a freshly parsed profile list. A parse failure leaves the
    /// current generation serving. The armed repeat migrates to the new
    /// generation or is disarmed; connected clients get a SIGHUP notice.
    #[instrument(skip_all, fields(config = %self.config_path.display()))]
    pub fn reload(&mut self) -> Result<()> {
        info!("reloading configuration");
        let remotes = config::parse_file(&self.config_path)?;
        let mut set = ProfileSet::new(remotes);
        set.generation = self.profiles.generation + 1;

        if let Some(mut rep) = self.repeat.take() {
            if rep.migrate(&set) {
                debug!(remote = %rep.remote, button = %rep.button, "repeat migrated");
                self.repeat = Some(rep);
            } else {
                info!("active repeat has no match in the new configuration, disarming");
            }
        }
        self.profiles = set;
        self.last_remote = None;
        let notice = proto::sighup_notice();
        self.broadcast(&notice);
        info!(
            generation = self.profiles.generation,
            remotes = self.profiles.remotes.len(),
            "reload complete"
        );
        Ok(())
    }

    /// Drain the receive path into the capture buffer. A receive-path
    /// hardware failure is fatal; the daemon cannot run without its
    /// input device.
    pub fn poll_hardware(&mut self) -> Result<()> {
        if !self.hw.capabilities().can_receive {
            return Ok(());
        }
        let mut got = false;
        loop {
            match self.hw.read_next_sample(Duration::ZERO) {
                Ok(Some(sample)) => {
                    got = true;
                    self.push_sample(sample);
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "receive path failed");
                    return Err(e);
                }
            }
        }
        if got {
            self.idle_polls = 0;
        } else if self.rx_buf.len() > 1 {
            self.idle_polls += 1;
            if self.idle_polls >= FLUSH_POLLS {
                // The lull is silence; close the frame with it.
                self.push_sample(RawSample::space(IDLE_SPACE));
            }
        }
        Ok(())
    }

    fn push_sample(&mut self, sample: RawSample) {
        match self.rx_buf.last_mut() {
            Some(last) if last.level == sample.level => {
                last.duration = last.duration.saturating_add(sample.duration);
            }
            _ => self.rx_buf.push(sample),
        }
        let threshold = self.frame_threshold();
        let frame_closed = self.rx_buf.len() >= 4
            && self
                .rx_buf
                .last()
                .is_some_and(|s| !s.is_pulse() && s.duration >= threshold);
        if frame_closed {
            self.try_decode_frame();
        }
    }

    fn try_decode_frame(&mut self) {
        self.idle_polls = 0;
        let event = decode(&mut self.profiles, &self.rx_buf, self.last_remote.as_deref());
        // The trailing gap doubles as the next frame's sync gap.
        let tail = self
            .rx_buf
            .last()
            .copied()
            .unwrap_or(RawSample::space(IDLE_SPACE));
        self.rx_buf.clear();
        self.rx_buf.push(tail);

        if let Some(event) = event {
            self.last_remote = Some(event.remote.clone());
            let line = proto::event_line(&event);
            self.broadcast(&line);
        }
    }

    /// A space at least this long closes a frame: the smallest gap any
    /// profile would accept for sync.
    fn frame_threshold(&self) -> u32 {
        let mut min_gap = u64::MAX;
        for p in &self.profiles.remotes {
            let mut g = p.expected_gap();
            if p.repeat_gap != 0 {
                g = g.min(p.repeat_gap);
            }
            let slack = (g * u64::from(p.eps) / 100).max(u64::from(p.aeps));
            min_gap = min_gap.min(g.saturating_sub(slack));
        }
        if min_gap == u64::MAX {
            10_000
        } else {
            min_gap.clamp(2_000, u32::MAX as u64) as u32
        }
    }

    pub fn repeat_deadline(&self) -> Option<Instant> {
        self.repeat.as_ref().map(|r| r.deadline)
    }

    /// The repeat timer fired: retransmit and rearm, unless the active
    /// generation no longer carries the armed code.
    pub fn fire_repeat(&mut self) {
        let Some(mut rep) = self.repeat.take() else {
            return;
        };
        if !rep.still_valid(&self.profiles) {
            info!(remote = %rep.remote, button = %rep.button, "repeat target changed, disarming");
            return;
        }
        let result = encode(&mut rep.profile, rep.entry, true).and_then(|wf| {
            self.hw.send(&wf)?;
            Ok(wf.gap)
        });
        match result {
            Ok(gap) => {
                debug!(remote = %rep.remote, button = %rep.button, count = rep.count + 1, "repeat retransmitted");
                rep.rearm(gap);
                self.repeat = Some(rep);
            }
            Err(e) => warn!(error = %e, "repeat transmission failed, disarming"),
        }
    }
}

/// Code shown in LIST output: the declared (first) alternate for numeric
/// entries, the entry index for raw ones.
fn listed_code(entry: &CodeEntry, index: usize) -> u64 {
    match &entry.signal {
        CodeSignal::Numeric { alternates, .. } => alternates.first().copied().unwrap_or(0),
        CodeSignal::Raw(_) => index as u64,
    }
}
