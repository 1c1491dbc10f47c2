use anduin_graph::facade::{
    DatasetPaths, DatasetSections, InternalDataFacade, SharedDataFacade, SharedRegion, SwapBarrier,
};
use anduin_graph::{FixedCoordinate, files, rtree};
use anduin_prepare::contractor::Contractor;
use anduin_prepare::edge_based::EdgeBasedGraphFactory;
use anduin_prepare::import::ImportDataset;
use anduin_prepare::{PrepareConfig, SpeedProfile};
use anduin_query::description::GeometryFormat;
use anduin_query::engine::SearchEngine;
use anduin_query::handlers::{RequestDispatcher, RouteParameters};
use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser)]
#[command(version, about = "Anduin routing engine toolbox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Builds a query-ready dataset from an import file.
    Prepare {
        /// Path to the JSON import document produced by the extractor.
        #[arg(env)]
        import_file: PathBuf,

        /// Dataset base path; the seven artifacts are written next to it.
        #[arg(env)]
        output_base: PathBuf,

        /// Penalty added when a turn crosses a traffic signal.
        #[arg(long, default_value_t = 10)]
        traffic_signal_penalty: i32,

        /// Penalty added for (legal, dead-end) U-turns.
        #[arg(long, default_value_t = 20)]
        u_turn_penalty: i32,

        /// Disables turn restriction handling.
        #[arg(long)]
        ignore_restrictions: bool,

        /// Components smaller than this are suppressed at low zoom.
        #[arg(long, default_value_t = 1000)]
        tiny_component_max_size: u32,

        /// Disables progress output.
        #[arg(long)]
        no_progress: bool,
    },

    /// Publishes a prepared dataset into a shared-memory region.
    Datastore {
        /// Dataset base path (as passed to `prepare`).
        #[arg(env)]
        dataset_base: PathBuf,

        /// Path of the shared region file.
        #[arg(env)]
        region_path: PathBuf,

        /// Per-slot capacity in bytes when creating a fresh region.
        #[arg(long, default_value_t = 64 * 1024 * 1024)]
        slot_capacity: usize,
    },

    /// Runs a one-shot query against a dataset. Debugging aid.
    Route {
        /// Dataset base path, or a shared region when --shared is set.
        #[arg(env)]
        dataset_base: PathBuf,

        /// Treat the path as a shared-memory region.
        #[arg(long)]
        shared: bool,

        /// Coordinates as lat,lon decimal degree pairs.
        #[arg(required = true, num_args = 2..)]
        coordinates: Vec<String>,

        /// Also request an alternative route.
        #[arg(long)]
        alternatives: bool,

        /// Include turn instructions in the reply.
        #[arg(long)]
        instructions: bool,

        /// Emit the geometry as a raw coordinate array instead of a polyline.
        #[arg(long)]
        unencoded: bool,
    },
}

fn progress_bar(enabled: bool, message: &'static str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("[{elapsed}] {spinner} {msg}")
            .expect("static template is valid"),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Some(bar)
}

fn run_prepare(
    import_file: &PathBuf,
    output_base: &PathBuf,
    config: PrepareConfig,
    show_progress: bool,
) -> anyhow::Result<()> {
    let import = ImportDataset::read_from(import_file)
        .with_context(|| format!("reading {}", import_file.display()))?;
    let node_count = import.nodes.len() as u32;

    let bar = progress_bar(show_progress, "expanding the edge-based graph...");
    let factory = EdgeBasedGraphFactory::new(
        node_count,
        import.edges,
        &import.barrier_nodes,
        &import.traffic_lights,
        &import.restrictions,
        &import.nodes,
        config,
    )?;
    let edge_based_node_count = factory.num_edge_based_nodes();
    let mut output = factory.run()?;
    bar.inspect(|b| b.finish_with_message("edge-based graph done"));

    let bar = progress_bar(show_progress, "contracting the hierarchy...");
    let contractor = Contractor::new(edge_based_node_count, &mut output.edges);
    let contraction = contractor.run(None)?;
    bar.inspect(|b| b.finish_with_message("contraction done"));

    let paths = DatasetPaths::from_base(output_base);
    let checksum = files::write_hsgr(&paths.hsgr, &contraction.graph)?;
    files::write_nodes(&paths.nodes, &import.nodes)?;
    files::write_edges(&paths.edges, &output.original_edge_data)?;
    files::write_names(&paths.names, &import.names)?;
    rtree::build(&output.segments, &paths.ram_index, &paths.file_index)?;
    files::write_timestamp(&paths.timestamp, "prepared by anduin")?;
    info!(
        "dataset written to {}.* ({} edge-based nodes, checksum {})",
        output_base.display(),
        edge_based_node_count,
        checksum
    );
    Ok(())
}

fn run_datastore(
    dataset_base: &PathBuf,
    region_path: &PathBuf,
    slot_capacity: usize,
) -> anyhow::Result<()> {
    let paths = DatasetPaths::from_base(dataset_base);
    let sections = DatasetSections::read_from(&paths)?;
    let mut region = match SharedRegion::open(region_path) {
        Ok(region) => region,
        Err(_) => SharedRegion::create(region_path, slot_capacity)?,
    };
    region.stage(&sections)?;
    let barrier = SwapBarrier::for_region(region_path);
    let guard = barrier.lock_for_update();
    region.activate();
    drop(guard);
    info!("dataset published into {}", region_path.display());
    Ok(())
}

fn parse_coordinate(text: &str) -> anyhow::Result<FixedCoordinate> {
    let (lat, lon) = text
        .split_once(',')
        .with_context(|| format!("coordinate {text:?} is not lat,lon"))?;
    let lat: f64 = lat.trim().parse()?;
    let lon: f64 = lon.trim().parse()?;
    Ok(FixedCoordinate::from_lat_lon_degrees(lat, lon))
}

fn run_route(
    dataset_base: &PathBuf,
    shared: bool,
    coordinates: &[String],
    alternatives: bool,
    instructions: bool,
    unencoded: bool,
) -> anyhow::Result<()> {
    let parameters = RouteParameters {
        coordinates: coordinates
            .iter()
            .map(|c| parse_coordinate(c))
            .collect::<anyhow::Result<_>>()?,
        alternatives,
        instructions,
        compression: if unencoded {
            GeometryFormat::Unencoded
        } else {
            GeometryFormat::Polyline
        },
        ..RouteParameters::default()
    };

    let reply = if shared {
        let facade = SharedDataFacade::attach(dataset_base)?;
        let barrier = facade.barrier();
        let dispatcher = RequestDispatcher::new(SearchEngine::with_barrier(facade, barrier));
        dispatcher.dispatch("viaroute", &parameters)
    } else {
        let paths = DatasetPaths::from_base(dataset_base);
        let facade = InternalDataFacade::load(&paths)?;
        let dispatcher = RequestDispatcher::new(SearchEngine::new(facade));
        dispatcher.dispatch("viaroute", &parameters)
    };
    println!("{}", serde_json::to_string_pretty(&reply.body)?);
    if reply.http_status != 200 {
        anyhow::bail!("query failed with HTTP {}", reply.http_status);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        // Standard logger, configured via the RUST_LOG env variable
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Prepare {
            import_file,
            output_base,
            traffic_signal_penalty,
            u_turn_penalty,
            ignore_restrictions,
            tiny_component_max_size,
            no_progress,
        } => {
            let config = PrepareConfig {
                speed_profile: SpeedProfile {
                    traffic_signal_penalty: *traffic_signal_penalty,
                    u_turn_penalty: *u_turn_penalty,
                    use_turn_restrictions: !*ignore_restrictions,
                },
                tiny_component_max_size: *tiny_component_max_size,
            };
            run_prepare(import_file, output_base, config, !*no_progress)
        }
        Command::Datastore {
            dataset_base,
            region_path,
            slot_capacity,
        } => run_datastore(dataset_base, region_path, *slot_capacity),
        Command::Route {
            dataset_base,
            shared,
            coordinates,
            alternatives,
            instructions,
            unencoded,
        } => run_route(
            dataset_base,
            *shared,
            coordinates,
            *alternatives,
            *instructions,
            *unencoded,
        ),
    }
}
