//! Per-device read loops and their fan-in.
//!
//! One named OS thread per device. Each thread owns its device handle and
//! its [`ChordState`]; the only things shared are the [`TriggerSink`] and a
//! cancellation flag. Reads wait in `poll(2)` for at most `poll_interval`,
//! so a cancelled loop exits within one interval even if its device is
//! silent.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::chord::{Chord, ChordState};
use super::record::{RecordAssembler, RECORD_SIZE};
use super::{HotkeyError, TriggerSink};

/// Largest accepted `read_batch`.
pub const MAX_READ_BATCH: usize = 4096;

/// Read loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Records requested per read, clamped to `1..=MAX_READ_BATCH`.
    pub read_batch: usize,
    /// Upper bound on how long a read waits before cancellation is checked.
    pub poll_interval: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            read_batch: 64,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Opens the byte stream for one device path. Called on the device's own
/// thread.
pub trait OpenDevice: Send + Sync + 'static {
    type Stream: Read;

    fn open(&self, path: &Path) -> io::Result<Self::Stream>;
}

/// Opens real evdev nodes as [`DeviceHandle`]s.
#[derive(Debug, Clone, Copy)]
pub struct KernelDevices {
    poll_interval: Duration,
}

impl KernelDevices {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl OpenDevice for KernelDevices {
    type Stream = DeviceHandle;

    fn open(&self, path: &Path) -> io::Result<DeviceHandle> {
        DeviceHandle::open(path, self.poll_interval)
    }
}

/// Read handle to one device node, owned by a single loop. Closed on drop.
#[derive(Debug)]
pub struct DeviceHandle {
    file: File,
    poll_timeout_ms: libc::c_int,
}

impl DeviceHandle {
    pub fn open(path: &Path, poll_interval: Duration) -> io::Result<Self> {
        let file = File::open(path)?;
        let poll_timeout_ms = poll_interval.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
        Ok(Self { file, poll_timeout_ms })
    }
}

impl Read for DeviceHandle {
    /// Waits up to the poll interval for input. A wait that expires yields
    /// `ErrorKind::TimedOut` so the caller can check for cancellation.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut fds = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut fds, 1, self.poll_timeout_ms) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 {
            return Err(io::ErrorKind::TimedOut.into());
        }
        // Readable, or POLLERR/POLLHUP: the read reports the actual error.
        self.file.read(buf)
    }
}

/// Requests cancellation of every loop of a [`HotkeyListener`].
#[derive(Debug, Clone)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct LoopExit {
    path: PathBuf,
    result: Result<(), HotkeyError>,
}

/// Running device loops.
pub struct HotkeyListener {
    cancel: Canceller,
    exits: mpsc::Receiver<LoopExit>,
    threads: Vec<(PathBuf, JoinHandle<()>)>,
}

impl HotkeyListener {
    /// Device paths being monitored.
    pub fn devices(&self) -> impl Iterator<Item = &Path> {
        self.threads.iter().map(|(path, _)| path.as_path())
    }

    /// Handle that stops all loops from another thread.
    pub fn canceller(&self) -> Canceller {
        self.cancel.clone()
    }

    /// Block until every loop has exited.
    ///
    /// The first loop failure cancels all other loops; they are joined
    /// before it is returned. Returns `Ok(())` when the loops stopped only
    /// because of cancellation.
    pub fn wait(self) -> Result<(), HotkeyError> {
        let HotkeyListener {
            cancel,
            exits,
            threads,
        } = self;

        let mut first_err: Option<HotkeyError> = None;
        for _ in 0..threads.len() {
            let Ok(exit) = exits.recv() else {
                break;
            };
            match exit.result {
                Ok(()) => debug!(path = %exit.path.display(), "Device loop stopped"),
                Err(e) => {
                    if first_err.is_none() {
                        error!(path = %exit.path.display(), error = %e, "Device loop failed, stopping hotkey listener");
                        cancel.cancel();
                        first_err = Some(e);
                    } else {
                        warn!(path = %exit.path.display(), error = %e, "Device loop failed during shutdown");
                    }
                }
            }
        }

        for (path, handle) in threads {
            if handle.join().is_err() && first_err.is_none() {
                first_err = Some(HotkeyError::ListenerPanicked { path });
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Cancel all loops and wait for them. Returns a failure that happened
    /// before the cancellation, if any.
    pub fn shutdown(self) -> Result<(), HotkeyError> {
        info!("Stopping hotkey listener");
        self.cancel.cancel();
        self.wait()
    }
}

/// Start one loop per device.
pub fn spawn<O: OpenDevice>(
    devices: Vec<PathBuf>,
    opener: O,
    chord: Chord,
    options: ListenerOptions,
    sink: TriggerSink,
) -> Result<HotkeyListener, HotkeyError> {
    let cancel = Canceller {
        flag: Arc::new(AtomicBool::new(false)),
    };
    let opener = Arc::new(opener);
    let (exit_tx, exits) = mpsc::channel();
    let mut threads = Vec::with_capacity(devices.len());

    for path in devices {
        info!(path = %path.display(), "Listening on device");

        let thread_path = path.clone();
        let opener = opener.clone();
        let chord = chord.clone();
        let options = options.clone();
        let sink = sink.clone();
        let cancel_flag = cancel.clone();
        let exit_tx = exit_tx.clone();

        let name = format!(
            "hotkey-{}",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_device(&thread_path, opener.as_ref(), chord, &options, &sink, &cancel_flag)
            }))
            .unwrap_or_else(|_| {
                Err(HotkeyError::ListenerPanicked {
                    path: thread_path.clone(),
                })
            });
            let _ = exit_tx.send(LoopExit {
                path: thread_path,
                result,
            });
        });

        match spawned {
            Ok(handle) => threads.push((path, handle)),
            Err(e) => {
                cancel.cancel();
                for (_, handle) in threads {
                    let _ = handle.join();
                }
                return Err(HotkeyError::Spawn(e));
            }
        }
    }

    Ok(HotkeyListener {
        cancel,
        exits,
        threads,
    })
}

fn run_device<O: OpenDevice>(
    path: &Path,
    opener: &O,
    chord: Chord,
    options: &ListenerOptions,
    sink: &TriggerSink,
    cancel: &Canceller,
) -> Result<(), HotkeyError> {
    let stream = opener.open(path).map_err(|source| HotkeyError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_loop(path, stream, chord, options, sink, cancel)
}

/// Read, decode and match until the stream fails or cancellation is seen.
pub fn read_loop<R: Read>(
    path: &Path,
    mut stream: R,
    chord: Chord,
    options: &ListenerOptions,
    sink: &TriggerSink,
    cancel: &Canceller,
) -> Result<(), HotkeyError> {
    let mut state = ChordState::new(chord);
    let mut assembler = RecordAssembler::new();
    let mut buf = vec![0u8; RECORD_SIZE * options.read_batch.clamp(1, MAX_READ_BATCH)];

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let n = match stream.read(&mut buf) {
            Ok(0) => {
                return Err(HotkeyError::StreamEnded {
                    path: path.to_path_buf(),
                })
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                continue
            }
            Err(source) => {
                return Err(HotkeyError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        assembler.push(&buf[..n], |record| {
            if state.feed(&record) {
                let delivered = sink.offer();
                debug!(path = %path.display(), delivered, "Chord detected");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Instant;

    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::hotkey::record::InputRecord;
    use crate::hotkey::{trigger_channel, TriggerSignal};

    const LEFT: u16 = 105;
    const RIGHT: u16 = 106;

    fn bytes(events: &[(u16, i32)]) -> Vec<u8> {
        events
            .iter()
            .flat_map(|(code, value)| InputRecord::key(*code, *value).to_bytes())
            .collect()
    }

    enum Step {
        Data(Vec<u8>),
        Fail(io::ErrorKind),
    }

    /// Plays back its steps, then idles (reports timeouts) until dropped.
    /// Sets `drained` once every step was read and `dropped` when the loop
    /// releases it.
    struct Scripted {
        steps: VecDeque<Step>,
        drained: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    fn scripted(steps: Vec<Step>) -> Scripted {
        Scripted {
            steps: steps.into(),
            drained: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(data)) => {
                    assert!(data.len() <= buf.len(), "test chunk larger than read buffer");
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Step::Fail(kind)) => Err(kind.into()),
                None => {
                    self.drained.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    /// Per-device observation flags shared with the test.
    #[derive(Clone)]
    struct Flags {
        drained: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct ScriptedDevices {
        scripts: Mutex<HashMap<PathBuf, Scripted>>,
        flags: HashMap<PathBuf, Flags>,
    }

    impl ScriptedDevices {
        fn with(mut self, path: &str, steps: Vec<Step>) -> Self {
            let script = scripted(steps);
            self.flags.insert(
                PathBuf::from(path),
                Flags {
                    drained: script.drained.clone(),
                    dropped: script.dropped.clone(),
                },
            );
            self.scripts.lock().unwrap().insert(PathBuf::from(path), script);
            self
        }

        fn flags(&self, path: &str) -> Flags {
            self.flags[Path::new(path)].clone()
        }
    }

    impl OpenDevice for ScriptedDevices {
        type Stream = Scripted;

        fn open(&self, path: &Path) -> io::Result<Scripted> {
            self.scripts
                .lock()
                .unwrap()
                .remove(path)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn set_within(flag: &AtomicBool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn cancel_flag() -> Canceller {
        Canceller {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    fn run_script(steps: Vec<Step>, options: &ListenerOptions, sink: &TriggerSink) -> Result<(), HotkeyError> {
        read_loop(
            Path::new("/dev/input/event4"),
            scripted(steps),
            Chord::left_right(),
            options,
            sink,
            &cancel_flag(),
        )
    }

    #[test]
    fn read_loop_fires_and_reports_read_error() {
        let (sink, mut rx) = trigger_channel();
        let err = run_script(
            vec![
                Step::Data(bytes(&[(LEFT, 1), (RIGHT, 1)])),
                Step::Fail(io::ErrorKind::Interrupted),
                Step::Fail(io::ErrorKind::Other),
            ],
            &ListenerOptions::default(),
            &sink,
        )
        .unwrap_err();

        assert!(matches!(err, HotkeyError::Read { .. }));
        assert_eq!(rx.try_recv(), Ok(TriggerSignal));
    }

    #[test]
    fn read_loop_end_of_stream() {
        let (sink, _rx) = trigger_channel();
        let err = read_loop(
            Path::new("/dev/input/event4"),
            io::empty(),
            Chord::left_right(),
            &ListenerOptions::default(),
            &sink,
            &cancel_flag(),
        )
        .unwrap_err();
        assert!(matches!(err, HotkeyError::StreamEnded { .. }));
    }

    #[test]
    fn record_split_across_reads_is_not_lost() {
        let (sink, mut rx) = trigger_channel();
        let data = bytes(&[(LEFT, 1), (RIGHT, 1)]);
        let split = RECORD_SIZE + 5;

        let _ = run_script(
            vec![
                Step::Data(data[..split].to_vec()),
                Step::Data(data[split..].to_vec()),
                Step::Fail(io::ErrorKind::BrokenPipe),
            ],
            &ListenerOptions::default(),
            &sink,
        );
        assert_eq!(rx.try_recv(), Ok(TriggerSignal));
    }

    #[test]
    fn back_to_back_chords_leave_one_pending_trigger() {
        let (sink, mut rx) = trigger_channel();
        let _ = run_script(
            vec![
                Step::Data(bytes(&[(LEFT, 1), (RIGHT, 1), (LEFT, 0), (RIGHT, 0)])),
                Step::Data(bytes(&[(LEFT, 1), (RIGHT, 1)])),
                Step::Fail(io::ErrorKind::Other),
            ],
            &ListenerOptions::default(),
            &sink,
        );
        assert_eq!(rx.try_recv(), Ok(TriggerSignal));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn oversized_read_batch_is_clamped() {
        let (sink, mut rx) = trigger_channel();
        let options = ListenerOptions {
            read_batch: usize::MAX,
            ..Default::default()
        };
        let err = run_script(
            vec![
                Step::Data(bytes(&[(LEFT, 1), (RIGHT, 1)])),
                Step::Fail(io::ErrorKind::Other),
            ],
            &options,
            &sink,
        )
        .unwrap_err();

        assert!(matches!(err, HotkeyError::Read { .. }));
        assert_eq!(rx.try_recv(), Ok(TriggerSignal));
    }

    /// Keys pressed on event2 never form the chord on their own.
    fn unrelated_activity() -> Vec<Step> {
        vec![Step::Data(bytes(&[
            (LEFT, 1),
            (LEFT, 0),
            (RIGHT, 1),
            (RIGHT, 0),
            (30, 1),
            (30, 0),
        ]))]
    }

    #[test]
    fn two_devices_only_firing_device_triggers() {
        let (sink, mut rx) = trigger_channel();
        let devices = ScriptedDevices::default()
            .with("/dev/input/event1", vec![Step::Data(bytes(&[(LEFT, 1), (RIGHT, 1)]))])
            .with("/dev/input/event2", unrelated_activity());
        let first = devices.flags("/dev/input/event1");
        let second = devices.flags("/dev/input/event2");

        let listener = spawn(
            vec![PathBuf::from("/dev/input/event1"), PathBuf::from("/dev/input/event2")],
            devices,
            Chord::left_right(),
            ListenerOptions::default(),
            sink,
        )
        .unwrap();
        assert_eq!(listener.devices().count(), 2);

        assert!(set_within(&first.drained, Duration::from_secs(5)));
        assert!(set_within(&second.drained, Duration::from_secs(5)));
        assert_eq!(rx.try_recv(), Ok(TriggerSignal));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        listener.shutdown().unwrap();
        assert!(first.dropped.load(Ordering::SeqCst));
        assert!(second.dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn non_firing_device_alone_never_triggers() {
        let (sink, mut rx) = trigger_channel();
        let devices = ScriptedDevices::default().with("/dev/input/event2", unrelated_activity());
        let flags = devices.flags("/dev/input/event2");

        let listener = spawn(
            vec![PathBuf::from("/dev/input/event2")],
            devices,
            Chord::left_right(),
            ListenerOptions::default(),
            sink,
        )
        .unwrap();

        assert!(set_within(&flags.drained, Duration::from_secs(5)));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        listener.shutdown().unwrap();
        assert!(flags.dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn first_failure_cancels_and_joins_siblings() {
        let (sink, _rx) = trigger_channel();
        let devices = ScriptedDevices::default()
            .with("/dev/input/event1", vec![])
            .with("/dev/input/event2", vec![Step::Fail(io::ErrorKind::Other)]);
        let idle = devices.flags("/dev/input/event1");

        let listener = spawn(
            vec![PathBuf::from("/dev/input/event1"), PathBuf::from("/dev/input/event2")],
            devices,
            Chord::left_right(),
            ListenerOptions::default(),
            sink,
        )
        .unwrap();

        match listener.wait() {
            Err(HotkeyError::Read { path, .. }) => assert_eq!(path, PathBuf::from("/dev/input/event2")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(idle.dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn open_failure_is_reported() {
        let (sink, _rx) = trigger_channel();
        let listener = spawn(
            vec![PathBuf::from("/dev/input/event9")],
            ScriptedDevices::default(),
            Chord::left_right(),
            ListenerOptions::default(),
            sink,
        )
        .unwrap();
        assert!(matches!(listener.wait(), Err(HotkeyError::Open { .. })));
    }

    #[test]
    fn canceller_stops_idle_loops() {
        let (sink, _rx) = trigger_channel();
        let devices = ScriptedDevices::default().with("/dev/input/event1", vec![]);
        let listener = spawn(
            vec![PathBuf::from("/dev/input/event1")],
            devices,
            Chord::left_right(),
            ListenerOptions::default(),
            sink,
        )
        .unwrap();

        let canceller = listener.canceller();
        let waiter = thread::spawn(move || listener.wait());
        canceller.cancel();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn device_handle_times_out_on_idle_pipe() {
        let (read_end, write_end) = {
            let mut fds = [0 as libc::c_int; 2];
            // SAFETY: fds has room for both descriptors.
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            (fds[0], fds[1])
        };
        // SAFETY: freshly created descriptors, each owned once.
        let file = unsafe { <File as std::os::unix::io::FromRawFd>::from_raw_fd(read_end) };
        let _writer = unsafe { <File as std::os::unix::io::FromRawFd>::from_raw_fd(write_end) };

        let mut handle = DeviceHandle {
            file,
            poll_timeout_ms: 10,
        };
        let mut buf = [0u8; RECORD_SIZE];
        let err = handle.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
