use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use coarse_prof::profile;
use log::{error, info, warn};
use structopt::StructOpt;

use scene_runner::reference::Trajectory;
use scene_runner::scenes::{available_scenes, load_scene, SceneParameters};

static BUILD_TIMESTAMP: Option<&'static str> = option_env!("BRICKFEM_BUILD_TIMESTAMP");
static BUILD_HOSTNAME: Option<&'static str> = option_env!("BRICKFEM_BUILD_HOSTNAME");
static GIT_LAST_COMMIT: Option<&'static str> = option_env!("BRICKFEM_GIT_LAST_COMMIT");
static GIT_CHANGES: Option<&'static str> = option_env!("BRICKFEM_GIT_CHANGES");

#[derive(Debug, StructOpt)]
struct CommandlineArgs {
    #[structopt(
        short = "-s",
        long = "--scene",
        help = "Name of scene to simulate",
        required_unless = "list-scenes"
    )]
    scene: Option<String>,
    #[structopt(short = "-l", long = "--list-scenes", help = "List available scenes")]
    list_scenes: bool,
    #[structopt(
        long,
        default_value = "data",
        parse(from_os_str),
        help = "Base directory for output files"
    )]
    output_dir: PathBuf,
    #[structopt(
        long,
        parse(from_os_str),
        help = "Configuration file: a JSON object with one entry per scene name"
    )]
    config_file: Option<PathBuf>,
    #[structopt(
        long,
        parse(from_os_str),
        help = "Path for the logfile relative to 'output-dir/scene-name'"
    )]
    log_file: Option<PathBuf>,
    #[structopt(
        long,
        default_value = "0",
        help = "The number of threads to use for the rayon thread pool, if not specified it will be read from env or default rayon value"
    )]
    num_threads: usize,
    #[structopt(
        long,
        parse(from_os_str),
        help = "Reference trajectory ('t x y z' per line) to compare the tracked node against"
    )]
    reference: Option<PathBuf>,
    #[structopt(
        long,
        default_value = "1e-3",
        help = "Largest accepted sum of relative coordinate errors per sample"
    )]
    precision: f64,
    #[structopt(
        long,
        help = "Write the trajectory of the tracked node to 'output-dir/scene-name/reference.txt'"
    )]
    write_reference: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = CommandlineArgs::from_args();
    if args.list_scenes {
        list_scenes();
        return Ok(());
    }

    initialize_logging(&args)?;
    initialize_thread_pool(&args)?;

    info!("Started brick_runner");
    print_git_info();

    info!("Running on '{}'", hostname::get()?.to_string_lossy());
    info!("Executable path: '{}'", env::current_exe()?.to_string_lossy());
    info!("Working directory: '{}'", env::current_dir()?.to_string_lossy());
    info!("Full command line: '{}'", env::args().collect::<Vec<_>>().join(" "));

    if let Err(err) = run_scene(&args) {
        error!("Scene returned error: {}", err);
        error!("Aborting.");
        return Err(err);
    }

    info!("Exiting.");
    Ok(())
}

fn list_scenes() {
    println!("Available scenes: ");
    for scene in available_scenes() {
        println!("  - {}", scene);
    }
}

fn run_scene(args: &CommandlineArgs) -> Result<(), Box<dyn Error>> {
    let scene_name = args
        .scene
        .as_ref()
        .ok_or_else(|| Box::<dyn Error>::from("No scene given"))?;

    let config = if let Some(config_path) = &args.config_file {
        let json_string = fs::read_to_string(config_path).map_err(|e| {
            format!(
                "Unable to open JSON file '{}' for reading ({:?})",
                config_path.to_string_lossy(),
                e
            )
        })?;
        let json: serde_json::Value = serde_json::from_str(&json_string).map_err(|e| {
            format!(
                "Error during parsing of JSON file '{}': {}",
                config_path.to_string_lossy(),
                e
            )
        })?;
        if !json.is_object() {
            return Err(Box::from(format!(
                "Expected a JSON object on the highest level in config file {}",
                config_path.to_string_lossy()
            )));
        }
        if json.get(scene_name).is_none() {
            warn!(
                "Did not find entry for scene `{}` in config file `{}`, using defaults",
                scene_name,
                config_path.to_string_lossy()
            );
        }
        Some(json)
    } else {
        None
    };

    let output_dir = args.output_dir.join(scene_name);
    let scene_params = SceneParameters {
        output_dir: output_dir.clone(),
        config,
    };

    info!("Starting to load scene {}.", scene_name);
    let mut scene = {
        profile!("load scene");
        load_scene(scene_name, &scene_params)?
    };
    info!("Loaded scene {}.", scene.name);

    info!("Starting simulation...");
    let t_before_sim = Instant::now();
    let trajectory = {
        profile!("simulation");
        scene.run()?
    };
    let elapsed = t_before_sim.elapsed();
    info!("Measured time for simulation: {:.6}s", elapsed.as_secs_f64());

    if let Some(sample) = trajectory.last() {
        info!(
            "Tracked node at t = {}: ({:.7e}, {:.7e}, {:.7e})",
            sample.time, sample.position.x, sample.position.y, sample.position.z
        );
    }

    let statistics = scene.simulation.statistics();
    info!("Solver statistics: {:?}", statistics);
    fs::create_dir_all(&output_dir)?;
    fs::write(
        output_dir.join("statistics.json"),
        serde_json::to_string_pretty(&statistics)?,
    )?;

    if args.write_reference {
        let path = output_dir.join("reference.txt");
        trajectory.write_to_path(&path)?;
        info!("Wrote trajectory with {} samples to '{}'.", trajectory.len(), path.to_string_lossy());
    }

    coarse_prof_write_string()?
        .split('\n')
        .for_each(|l| info!("{}", l));

    if let Some(reference_path) = &args.reference {
        let reference = Trajectory::read_from_path(reference_path)?;
        let comparison = trajectory.compare_to(&reference)?;
        info!(
            "Compared {} samples against '{}': largest error {:.3e} at t = {}.",
            comparison.num_compared,
            reference_path.to_string_lossy(),
            comparison.max_error,
            comparison.max_error_time
        );
        if !comparison.within(args.precision) {
            return Err(Box::from(format!(
                "Trajectory deviates from the reference by {:.3e} (precision {:.3e})",
                comparison.max_error, args.precision
            )));
        }
    }

    info!("Simulation finished.");
    Ok(())
}

fn initialize_logging(args: &CommandlineArgs) -> Result<(), Box<dyn Error>> {
    // Try to load log filter level from env
    let mut unknown_log_filter_level = None;
    let log_filter_level = if let Some(log_level) = std::env::var_os("RUST_LOG") {
        let log_level = log_level.to_string_lossy().to_ascii_lowercase();
        match log_level.as_str() {
            "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "warn" => log::LevelFilter::Warn,
            "info" => log::LevelFilter::Info,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => {
                unknown_log_filter_level = Some(log_level);
                log::LevelFilter::Info
            }
        }
    } else {
        log::LevelFilter::Info
    };

    let log_dir = if let Some(scene_name) = &args.scene {
        args.output_dir.join(scene_name)
    } else {
        args.output_dir.clone()
    };
    fs::create_dir_all(&log_dir).map_err(|e| {
        format!(
            "Unable to create output directory '{}' ({:?})",
            log_dir.to_string_lossy(),
            e
        )
    })?;

    let log_file_path = if let Some(log_file_name) = &args.log_file {
        log_dir.join(log_file_name)
    } else {
        log_dir.join(format!(
            "brick_runner_{}.log",
            chrono::Local::now().format("%F_%H-%M-%S-%6f")
        ))
    };

    let log_file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&log_file_path)
        .map_err(|e| {
            format!(
                "Unable to open log file '{}' for writing ({:?})",
                log_file_path.to_string_lossy(),
                e
            )
        })?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log_filter_level)
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(|e| format!("Unable to apply logger configuration ({:?})", e))?;

    if let Some(filter_level) = unknown_log_filter_level {
        error!(
            "Unknown log filter level '{}' defined in 'RUST_LOG' env variable, using INFO instead.",
            filter_level
        );
    }

    Ok(())
}

fn initialize_thread_pool(args: &CommandlineArgs) -> Result<(), Box<dyn Error>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.num_threads)
        .build_global()?;
    if args.num_threads == 0usize {
        if let Ok(rayon_num_threads) = env::var("RAYON_NUM_THREADS") {
            info!("Number of Rayon threads: {} (from environment)", rayon_num_threads);
        } else {
            info!("Number of Rayon threads: {} (default)", rayon::current_num_threads());
        }
    } else {
        info!("Number of Rayon threads: {} (from command-line args)", args.num_threads);
    };

    Ok(())
}

fn print_git_info() {
    info!("Build info");

    let build_timestamp = BUILD_TIMESTAMP.unwrap_or("Unknown");
    let build_hostname = BUILD_HOSTNAME.unwrap_or("Unknown");

    info!("\tBuild timestamp: {}", build_timestamp);
    info!("\tBuild hostname: '{}'", build_hostname);

    match GIT_LAST_COMMIT {
        Some(last_commit) if !last_commit.is_empty() => {
            info!("\tCommand 'git show -s --format=Commit: %H%nAuthor: %an, %aI%nTitle: '%s'':");
            for line in last_commit.split(';') {
                info!("\t\t{}", line);
            }
        }
        _ => warn!("\tGit commit information was unavailable at build time"),
    }

    match GIT_CHANGES {
        Some(git_changes) if !git_changes.is_empty() => {
            info!("\tCommand: 'git status -b --porcelain':");
            for line in git_changes.split(';') {
                info!("\t\t{}", line);
            }
        }
        _ => warn!("\tGit file status information was unavailable at build time"),
    }
}

/// Returns the coarse_prof write output as a string
fn coarse_prof_write_string() -> Result<String, Box<dyn Error>> {
    let mut buffer = Vec::new();
    coarse_prof::write(&mut buffer)?;
    Ok(String::from_utf8_lossy(buffer.as_slice()).into_owned())
}
