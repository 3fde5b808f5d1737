// What you SEE:
// • First a "Select ROI" window with the first frame: drag a box with the left
//   mouse button, Enter/Space accepts it, C cancels.
// • Then the "Tracker" window: the video with the tracked box, "Lost Track" when
//   the target is gone, and the tracker name + FPS in the corner.
// • L picks a new ROI on the current frame, K stops tracking, ESC quits.

mod camera;
#[cfg(feature = "opencv")]
mod cv;
mod draw;
mod error;
mod selector;
mod session;
mod source;
mod tracker;
mod types;

use camera::CameraCapture;
use clap::{Args, Parser, Subcommand};
use draw::Drawer;
use error::Error;
use fern::Dispatch;
use log::{LevelFilter, debug, info};
use session::TrackingSession;
use source::{FrameSource, ImageSequence};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracker::{TrackerConfig, TrackerKind};
use types::{FrameBuffer, Rect};

const SELECT_WINDOW: &str = "Select ROI";
const TRACK_WINDOW: &str = "Tracker";

#[derive(Parser)]
#[command(name = "roi-tracker")]
#[command(version, about = "Draw a box on a video and watch it get tracked", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append log lines to this file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Select an ROI on the first frame, then track it
    Track(TrackArgs),

    /// Select an ROI on a still image and print it
    Select {
        /// Image file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
}

#[derive(Args)]
struct TrackArgs {
    /// Camera index to open (ignored with --frames / --video)
    #[arg(short, long, value_name = "INDEX", default_value_t = 0)]
    camera: u32,

    /// Directory of images (played in name order) or a single image, instead of a camera
    #[arg(short, long, value_name = "PATH")]
    frames: Option<PathBuf>,

    /// Video file to play instead of a camera
    #[cfg(feature = "opencv")]
    #[arg(long, value_name = "FILE", conflicts_with = "frames")]
    video: Option<PathBuf>,

    /// Requested camera width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Requested camera height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Tracking algorithm
    #[arg(short, long, value_enum, default_value_t = TrackerKind::DEFAULT)]
    tracker: TrackerKind,

    /// How far (pixels) the box may move between frames (ssd/ncc only)
    #[arg(
        long,
        value_name = "PX",
        default_value_t = 24,
        value_parser = clap::value_parser!(i32).range(0..=4096)
    )]
    search_radius: i32,

    /// Template update rate, 0 keeps the first appearance (ssd/ncc only)
    #[arg(long, value_name = "RATE", default_value_t = 0.05)]
    learning_rate: f32,

    /// Pause after each file frame (images or video). It is part of the
    /// frame gap, so it lowers the FPS readout
    #[arg(long, value_name = "MS", default_value_t = 33)]
    frame_delay_ms: u64,

    /// Single shot: the first ROI must work, L/K are disabled
    #[arg(long)]
    once: bool,
}

/// Debug only on request, whatever the build profile.
fn log_level(verbose: bool) -> LevelFilter {
    if verbose { LevelFilter::Debug } else { LevelFilter::Info }
}

fn init_logging(verbose: bool, log_file: Option<&PathBuf>) -> Result<(), Error> {
    let level = log_level(verbose);
    let mut dispatch = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());
    if let Some(path) = log_file {
        let file = fern::log_file(path)
            .map_err(|e| Error::Logging(format!("{}: {e}", path.display())))?;
        dispatch = dispatch.chain(file);
    }
    dispatch.apply().map_err(|e| Error::Logging(e.to_string()))?;
    log_panics::init();
    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_ref())?;

    match cli.command {
        Commands::Track(args) => track(args),
        Commands::Select { image } => {
            let frame = source::load_image(&image)?;
            match selector::select_roi(SELECT_WINDOW, &frame)? {
                Some(roi) => println!("ROI selected: {roi}"),
                None => println!("ROI selection cancelled."),
            }
            Ok(())
        }
    }
}

fn open_source(args: &TrackArgs) -> Result<Box<dyn FrameSource>, Error> {
    #[cfg(feature = "opencv")]
    if let Some(path) = &args.video {
        return Ok(Box::new(source::VideoFile::open(path)?));
    }
    let source: Box<dyn FrameSource> = match &args.frames {
        Some(path) => Box::new(ImageSequence::open(path)?),
        None => Box::new(CameraCapture::new(args.camera, args.width, args.height)?),
    };
    Ok(source)
}

/// True when frames come from files rather than a live camera.
fn plays_files(args: &TrackArgs) -> bool {
    #[cfg(feature = "opencv")]
    if args.video.is_some() {
        return true;
    }
    args.frames.is_some()
}

/// Start tracking the first selection. With `once`, a cancelled or rejected
/// ROI ends the run; otherwise the user can still press L.
fn begin(
    session: &mut TrackingSession,
    frame: &FrameBuffer,
    roi: Option<Rect>,
    once: bool,
) -> Result<(), Error> {
    match roi {
        Some(roi) => {
            if !session.start(frame, roi) && once {
                return Err(Error::TrackerInit(roi));
            }
        }
        None if once => return Err(Error::SelectionCancelled),
        None => info!("no ROI selected; press L to pick one"),
    }
    Ok(())
}

/// L: a new ROI replaces the tracker, a cancelled one leaves it running.
fn reselect(session: &mut TrackingSession, frame: &FrameBuffer, roi: Option<Rect>) {
    match roi {
        Some(roi) => {
            session.start(frame, roi);
        }
        None => info!("ROI re-selection cancelled"),
    }
}

fn track(args: TrackArgs) -> Result<(), Error> {
    /* --- Source + first frame ---
       Either failing is fatal: there is nothing to select on. */
    let mut source = open_source(&args)?;
    let first = source.next_frame()?.ok_or(Error::NoFirstFrame)?;

    let mut session = TrackingSession::new(TrackerConfig {
        kind: args.tracker,
        search_radius: args.search_radius,
        learning_rate: args.learning_rate,
    });

    /* --- Initial ROI --- */
    let roi = selector::select_roi(SELECT_WINDOW, &first)?;
    begin(&mut session, &first, roi, args.once)?;

    let mut drawer = Drawer::new(TRACK_WINDOW, first.width, first.height)?;
    let frame_delay = plays_files(&args).then(|| Duration::from_millis(args.frame_delay_ms));

    let mut last_fps_log = Instant::now();
    let mut frames_this_second: u32 = 0;

    /* ------------------------------ Main loop ------------------------------ */
    while drawer.is_open() && !drawer.esc_pressed() {
        let Some(mut frame) = source.next_frame()? else {
            info!("end of stream");
            break;
        };

        if !args.once {
            if drawer.l_pressed_once() {
                // Select on a clean copy; the overlay is drawn afterwards.
                let roi = selector::select_roi(SELECT_WINDOW, &frame)?;
                reselect(&mut session, &frame, roi);
            }
            if drawer.k_pressed_once() {
                session.clear();
            }
        }

        let now = Instant::now();
        let (status, fps) = session.process(&mut frame, now);
        drawer.present(&frame)?;

        frames_this_second += 1;
        if now.duration_since(last_fps_log) >= Duration::from_secs(1) {
            debug!(
                "{} - FPS: {fps:.2} ({frames_this_second} frames), status {status:?}",
                session.tracker_name()
            );
            frames_this_second = 0;
            last_fps_log = now;
        }

        if let Some(d) = frame_delay {
            std::thread::sleep(d);
        }
    }

    info!("tracking stopped (tracker active: {})", session.is_active());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::FrameStatus;

    fn session() -> TrackingSession {
        TrackingSession::new(TrackerConfig {
            kind: TrackerKind::Ssd,
            search_radius: 6,
            learning_rate: 0.0,
        })
    }

    /// 120x90 dark frame with a bright 12x12 block at (x,y).
    fn frame_with_block(x: usize, y: usize) -> FrameBuffer {
        let mut fb = FrameBuffer { width: 120, height: 90, pixels: vec![0x0010_1010; 120 * 90] };
        for yy in y..y + 12 {
            for xx in x..x + 12 {
                fb.pixels[yy * 120 + xx] = 0x00F0_E0D0;
            }
        }
        fb
    }

    const ROI: Rect = Rect::new(36, 26, 20, 20);
    const TINY: Rect = Rect::new(5, 5, 1, 1);

    #[test]
    fn single_shot_cancel_is_fatal() {
        let mut s = session();
        let r = begin(&mut s, &frame_with_block(40, 30), None, true);
        assert!(matches!(r, Err(Error::SelectionCancelled)));
        assert!(!s.is_active());
    }

    #[test]
    fn single_shot_rejected_roi_is_fatal() {
        let mut s = session();
        let r = begin(&mut s, &frame_with_block(40, 30), Some(TINY), true);
        assert!(matches!(r, Err(Error::TrackerInit(roi)) if roi == TINY));
    }

    #[test]
    fn interactive_start_survives_cancel_and_rejection() {
        let frame = frame_with_block(40, 30);
        let mut s = session();
        assert!(begin(&mut s, &frame, None, false).is_ok());
        assert!(!s.is_active());
        assert!(begin(&mut s, &frame, Some(TINY), false).is_ok());
        assert!(!s.is_active());

        begin(&mut s, &frame, Some(ROI), true).unwrap();
        assert!(s.is_active());
    }

    #[test]
    fn cancelled_reselect_keeps_the_running_tracker() {
        let frame = frame_with_block(40, 30);
        let mut s = session();
        begin(&mut s, &frame, Some(ROI), false).unwrap();

        reselect(&mut s, &frame, None);
        assert!(s.is_active());
        assert_eq!(s.update(&frame_with_block(42, 31)), FrameStatus::Tracking(Rect::new(38, 27, 20, 20)));

        // A rejected new ROI drops it.
        reselect(&mut s, &frame, Some(TINY));
        assert!(!s.is_active());

        reselect(&mut s, &frame, Some(ROI));
        assert!(s.is_active());
        s.clear();
        assert_eq!(s.update(&frame), FrameStatus::Idle);
    }

    #[test]
    fn cli_bounds_the_search_radius() {
        let ok = Cli::try_parse_from(["roi-tracker", "track", "--search-radius", "4096"]);
        assert!(ok.is_ok());
        let huge = Cli::try_parse_from(["roi-tracker", "track", "--search-radius", "2147483647"]);
        assert!(huge.is_err());
        let negative = Cli::try_parse_from(["roi-tracker", "track", "--search-radius=-1"]);
        assert!(negative.is_err());
    }

    #[test]
    fn debug_logging_needs_verbose() {
        assert_eq!(log_level(false), LevelFilter::Info);
        assert_eq!(log_level(true), LevelFilter::Debug);
    }

    #[test]
    fn frame_delay_help_mentions_the_fps_readout() {
        use clap::CommandFactory;
        let cmd = Cli::command();
        let track = cmd.find_subcommand("track").unwrap();
        let arg = track.get_arguments().find(|a| a.get_id() == "frame_delay_ms").unwrap();
        let help = arg.get_long_help().or(arg.get_help()).unwrap().to_string();
        assert!(help.contains("FPS readout"), "{help}");
    }

    #[test]
    fn default_tracker_comes_from_the_library_when_available() {
        let Ok(Cli { command: Commands::Track(args), .. }) =
            Cli::try_parse_from(["roi-tracker", "track"])
        else {
            panic!("track did not parse");
        };
        assert_eq!(args.tracker, TrackerKind::DEFAULT);
        #[cfg(feature = "opencv")]
        assert_eq!(args.tracker, TrackerKind::Kcf);
        assert!(!plays_files(&args));
    }
}
