use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;
use tiltbridge_common::display::{DisplaySample, Throttle};
use tiltbridge_common::frame::{ChecksumPolicy, RawFrame};
use tiltbridge_common::{AngleReference, ImuSample};

use crate::config::SerialConfig;
use crate::error::{BridgeError, Result};
use crate::events::{latest, LatestSender};
use crate::record::Recorder;
use crate::serial::{self, is_cancelled, CancellableReader, StopFlag};
use crate::sync::FrameSync;

/// Requests handled by the IMU worker between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuControl {
    SetRelative,
    SetAbsolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImuStats {
    pub frames: u64,
    pub anomalies: u64,
    pub emitted: u64,
    pub recorded: u64,
    pub skipped_bytes: u64,
}

impl std::fmt::Display for ImuStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} anomalies, {} displayed, {} recorded, {} bytes skipped",
            self.frames, self.anomalies, self.emitted, self.recorded, self.skipped_bytes
        )
    }
}

/// Decoder, throttle and optional recorder for one IMU connection. Owns the
/// running sample; nothing else writes to it.
pub struct ImuPipeline<W: Write> {
    sample: ImuSample,
    reference: AngleReference,
    throttle: Throttle,
    policy: ChecksumPolicy,
    recorder: Option<Recorder<W>>,
    stats: ImuStats,
}

impl<W: Write> ImuPipeline<W> {
    pub fn new(policy: ChecksumPolicy, recorder: Option<Recorder<W>>) -> Self {
        Self {
            sample: ImuSample::default(),
            reference: AngleReference::default(),
            throttle: Throttle::default(),
            policy,
            recorder,
            stats: ImuStats::default(),
        }
    }

    #[cfg(test)]
    pub fn sample(&self) -> &ImuSample {
        &self.sample
    }

    #[cfg(test)]
    pub fn reference(&self) -> &AngleReference {
        &self.reference
    }

    pub fn stats(&self) -> ImuStats {
        self.stats
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn set_relative(&mut self) {
        self.reference.set_relative(&self.sample);
        info!(
            "Angle reference set to {:.1} {:.1} {:.1}",
            self.reference.x, self.reference.y, self.reference.z
        );
    }

    pub fn set_absolute(&mut self) {
        self.reference.set_absolute();
        info!("Angle reference cleared");
    }

    pub fn apply_control(&mut self, control: ImuControl) {
        match control {
            ImuControl::SetRelative => self.set_relative(),
            ImuControl::SetAbsolute => self.set_absolute(),
        }
    }

    /// Decode one frame, record it, and return a display sample every
    /// sixteenth frame.
    pub fn process(&mut self, frame: &RawFrame) -> Result<Option<DisplaySample>> {
        let outcome = self.sample.decode_frame(frame, self.policy);
        self.stats.frames += 1;
        for anomaly in outcome.anomalies.iter().flatten() {
            self.stats.anomalies += 1;
            debug!("Dropped sub-record: {}", anomaly);
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.write(&self.sample)?;
            self.stats.recorded = recorder.rows();
        }

        if self.throttle.tick() {
            self.stats.emitted += 1;
            Ok(Some(DisplaySample::new(&self.sample, &self.reference)))
        } else {
            Ok(None)
        }
    }

    /// Flush and close the recording, if any.
    pub fn finish(&mut self) -> Result<()> {
        match self.recorder.take() {
            Some(recorder) => {
                debug!("Closing recording {:?}", recorder.path());
                recorder.finish().map(|_| ())
            }
            None => Ok(()),
        }
    }
}

/// Pump frames through the pipeline until the stream ends or fails.
pub fn run_pipeline<R: Read, W: Write>(
    frames: &mut FrameSync<R>,
    pipeline: &mut ImuPipeline<W>,
    control: &Receiver<ImuControl>,
    display: &LatestSender<DisplaySample>,
) -> Result<()> {
    for frame in frames.by_ref() {
        while let Ok(request) = control.try_recv() {
            pipeline.apply_control(request);
        }
        let frame = frame?;
        if let Some(sample) = pipeline.process(&frame)? {
            display.publish(sample);
        }
    }
    Ok(())
}

/// A running IMU worker. Dropping it stops the worker.
pub struct ImuSession {
    stop: StopFlag,
    control: Sender<ImuControl>,
    display: Receiver<DisplaySample>,
    handle: Option<JoinHandle<Result<ImuStats>>>,
}

impl ImuSession {
    /// Open the port, create the recording if asked, and start reading.
    /// Every connection starts in absolute angle mode.
    pub fn connect(
        config: &SerialConfig,
        record_dir: Option<&Path>,
        policy: ChecksumPolicy,
    ) -> Result<Self> {
        let port = serial::open(config)?;
        let recorder = match record_dir {
            Some(dir) => Some(Recorder::create_in(dir)?),
            None => None,
        };
        Ok(Self::spawn(port, recorder, policy))
    }

    pub fn spawn<P>(port: P, recorder: Option<Recorder<File>>, policy: ChecksumPolicy) -> Self
    where
        P: Read + Write + Send + 'static,
    {
        let stop = StopFlag::default();
        let (control_tx, control_rx) = unbounded();
        let (display_tx, display_rx) = latest();

        let worker_stop = stop.clone();
        let handle = thread::spawn(move || {
            let reader = CancellableReader::new(port, worker_stop);
            let mut frames = FrameSync::new(BufReader::new(reader));
            let mut pipeline = ImuPipeline::new(policy, recorder);
            info!(
                "IMU worker started, {:?} checksums, recording {}",
                policy,
                if pipeline.is_recording() { "on" } else { "off" }
            );

            let outcome = run_pipeline(&mut frames, &mut pipeline, &control_rx, &display_tx);

            // no drain: whatever is still buffered is dropped
            let skipped = frames.skipped();
            let mut port = frames.into_inner().into_inner().into_inner();
            let finished = pipeline.finish();
            if let Err(e) = port.flush() {
                warn!("Error flushing IMU port: {}", e);
            }
            drop(port);

            let mut stats = pipeline.stats();
            stats.skipped_bytes = skipped;
            info!(
                "IMU worker done: {} frames, {} anomalies, {} emitted, {} recorded",
                stats.frames, stats.anomalies, stats.emitted, stats.recorded
            );

            match outcome {
                Err(BridgeError::Io(e)) if is_cancelled(&e) => debug!("IMU read cancelled"),
                Err(e) => {
                    error!("IMU worker stopped: {}", e);
                    finished?;
                    return Err(e);
                }
                Ok(()) => info!("IMU stream closed"),
            }
            finished.map(|_| stats)
        });

        Self {
            stop,
            control: control_tx,
            display: display_rx,
            handle: Some(handle),
        }
    }

    /// Latest throttled sample; older unread samples are replaced.
    pub fn display(&self) -> &Receiver<DisplaySample> {
        &self.display
    }

    pub fn set_relative(&self) {
        self.send_control(ImuControl::SetRelative);
    }

    pub fn set_absolute(&self) {
        self.send_control(ImuControl::SetAbsolute);
    }

    fn send_control(&self, request: ImuControl) {
        if self.control.send(request).is_err() {
            warn!("IMU worker is gone, {:?} ignored", request);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop reading, close the recording and the port. Returns once the
    /// worker has exited.
    pub fn stop(mut self) -> Result<ImuStats> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<ImuStats> {
        self.stop.raise();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| BridgeError::WorkerPanicked)?,
            None => Ok(ImuStats::default()),
        }
    }
}

impl Drop for ImuSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("IMU session ended with error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;
    use std::time::Duration;
    use tiltbridge_common::frame::{SubRecord, SubRecordKind};

    use crate::testutil::ChannelReader;

    fn frame(angle: [i16; 3]) -> RawFrame {
        RawFrame::from_records(&[
            SubRecord::new(SubRecordKind::Acceleration, [0, 0, 2048, 340]),
            SubRecord::new(SubRecordKind::AngularVelocity, [164, 0, 0, 340]),
            SubRecord::new(
                SubRecordKind::Orientation,
                [angle[0], angle[1], angle[2], 340],
            ),
        ])
    }

    fn stream(frames: &[RawFrame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect()
    }

    /// Cursor that also accepts writes so it can stand in for a port.
    struct Loopback(Cursor<Vec<u8>>);

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emits_once_per_sixteen_frames() {
        let mut pipeline: ImuPipeline<Vec<u8>> = ImuPipeline::new(ChecksumPolicy::Ignore, None);
        let f = frame([0, 0, 0]);
        let emitted: Vec<usize> = (1..=48)
            .filter(|_| pipeline.process(&f).unwrap().is_some())
            .collect();
        assert_eq!(emitted, vec![16, 32, 48]);
        assert_eq!(pipeline.stats().frames, 48);
        assert_eq!(pipeline.stats().emitted, 3);
    }

    #[test]
    fn relative_mode_zeroes_then_tracks_changes() {
        let mut pipeline: ImuPipeline<Vec<u8>> = ImuPipeline::new(ChecksumPolicy::Ignore, None);
        // 1820 raw ~= 10 degrees
        let start = frame([1820, -910, 3640]);
        for _ in 0..15 {
            assert!(pipeline.process(&start).unwrap().is_none());
        }
        pipeline.set_relative();
        let display = pipeline.process(&start).unwrap().unwrap();
        for axis in display.angle {
            assert_abs_diff_eq!(axis, 0.0, epsilon = 1e-9);
        }

        let turned = frame([1820 + 182, -910, 3640 - 364]);
        for _ in 0..15 {
            pipeline.process(&turned).unwrap();
        }
        let display = pipeline.process(&turned).unwrap().unwrap();
        let step = 182.0 / 32768.0 * 180.0;
        assert_abs_diff_eq!(display.angle[0], step, epsilon = 1e-9);
        assert_abs_diff_eq!(display.angle[1], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(display.angle[2], -2.0 * step, epsilon = 1e-9);

        pipeline.set_absolute();
        for _ in 0..15 {
            pipeline.process(&turned).unwrap();
        }
        let display = pipeline.process(&turned).unwrap().unwrap();
        assert_abs_diff_eq!(display.angle[0], pipeline.sample().angle_x, epsilon = 1e-12);
    }

    #[test]
    fn records_every_frame() {
        let recorder = Recorder::from_writer(Vec::new(), "mem").unwrap();
        let mut pipeline = ImuPipeline::new(ChecksumPolicy::Ignore, Some(recorder));
        assert!(pipeline.is_recording());
        for _ in 0..5 {
            pipeline.process(&frame([0, 0, 0])).unwrap();
        }
        assert_eq!(pipeline.stats().recorded, 5);
        pipeline.finish().unwrap();
        assert!(!pipeline.is_recording());
    }

    #[test]
    fn anomalies_are_counted_not_fatal() {
        let mut records = frame([0, 0, 0]).sub_records();
        records[1].prefix = 0x7F;
        let bad = RawFrame::from_records(&records);

        let mut pipeline: ImuPipeline<Vec<u8>> = ImuPipeline::new(ChecksumPolicy::Ignore, None);
        pipeline.process(&bad).unwrap();
        pipeline.process(&bad).unwrap();
        assert_eq!(pipeline.stats().anomalies, 2);
        assert_eq!(pipeline.sample().vel_x, 0.0);
    }

    #[test]
    fn control_requests_apply_between_frames() {
        let bytes = stream(&vec![frame([1820, 0, 0]); 32]);
        let mut frames = FrameSync::new(Cursor::new(bytes));
        let mut pipeline: ImuPipeline<Vec<u8>> = ImuPipeline::new(ChecksumPolicy::Ignore, None);
        let (control_tx, control_rx) = unbounded();
        let (display_tx, display_rx) = latest();

        // applied before the first frame, so the reference stays at zero
        control_tx.send(ImuControl::SetRelative).unwrap();
        run_pipeline(&mut frames, &mut pipeline, &control_rx, &display_tx).unwrap();

        assert!(pipeline.reference().is_absolute());
        let last = display_rx.try_recv().unwrap();
        assert_abs_diff_eq!(last.angle[0], 1820.0 / 32768.0 * 180.0, epsilon = 1e-9);
        assert_eq!(pipeline.stats().emitted, 2);
    }

    #[test]
    fn session_records_and_finishes_on_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::create_in(dir.path()).unwrap();
        let path = recorder.path().to_path_buf();

        let mut bytes = vec![0x00, 0x01];
        bytes.extend(stream(&vec![frame([0, 0, 0]); 20]));
        let session = ImuSession::spawn(
            Loopback(Cursor::new(bytes)),
            Some(recorder),
            ChecksumPolicy::Ignore,
        );

        let display = session
            .display()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(display.accel_text[2], "  1.00");

        let stats = session.stop().unwrap();
        assert_eq!(stats.frames, 20);
        assert_eq!(stats.recorded, 20);
        assert_eq!(stats.skipped_bytes, 2);

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 21);
    }

    struct BlockingPort(ChannelReader);

    impl Read for BlockingPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for BlockingPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stop_interrupts_a_blocked_worker() {
        let (tx, reader) = ChannelReader::pair();
        let session = ImuSession::spawn(BlockingPort(reader), None, ChecksumPolicy::Ignore);

        for byte in stream(&[frame([0, 0, 0]); 3]) {
            tx.send(byte).unwrap();
        }
        // half a frame, then silence
        tx.send(0x55).unwrap();
        tx.send(0x51).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(session.is_running());

        let stats = session.stop().unwrap();
        assert_eq!(stats.frames, 3);
        drop(tx);
    }
}
