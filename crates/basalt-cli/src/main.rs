//! Basalt CLI - drive the terrain core from the command line

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "basalt")]
#[command(about = "Camera-relative paged terrain toolkit", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a terrain config file
    Check {
        /// Path to a TOML config
        config: String,
    },

    /// Sample heights and normals at a world position
    Sample {
        /// World x in meters
        x: f32,

        /// World z in meters
        z: f32,

        /// Path to a TOML config
        #[arg(long)]
        config: Option<String>,

        /// 16-bit grayscale heightmap PNG (procedural waves if omitted)
        #[arg(long)]
        heightmap: Option<String>,

        /// World extent of the heightmap in meters
        #[arg(long, default_value = "1024")]
        extent: i64,

        /// Vertical scale applied to heightmap samples
        #[arg(long, default_value = "100.0")]
        height_scale: f32,
    },

    /// Fly a straight camera path and report paging activity
    Fly {
        /// Path length in meters
        #[arg(long, default_value = "2048")]
        distance: i64,

        /// Meters advanced per simulated frame
        #[arg(long, default_value = "8")]
        step: i64,

        /// Path to a TOML config
        #[arg(long)]
        config: Option<String>,

        /// 16-bit grayscale heightmap PNG (procedural waves if omitted)
        #[arg(long)]
        heightmap: Option<String>,

        /// World extent of the heightmap in meters
        #[arg(long, default_value = "1024")]
        extent: i64,

        /// Vertical scale applied to heightmap samples
        #[arg(long, default_value = "100.0")]
        height_scale: f32,
    },

    /// Export the page under a world position as a Wavefront OBJ mesh
    Export {
        /// World x in meters
        x: f32,

        /// World z in meters
        z: f32,

        /// Output path
        #[arg(short, long, default_value = "terrain.obj")]
        output: String,

        /// Path to a TOML config
        #[arg(long)]
        config: Option<String>,

        /// 16-bit grayscale heightmap PNG (procedural waves if omitted)
        #[arg(long)]
        heightmap: Option<String>,

        /// World extent of the heightmap in meters
        #[arg(long, default_value = "1024")]
        extent: i64,

        /// Vertical scale applied to heightmap samples
        #[arg(long, default_value = "100.0")]
        height_scale: f32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { config } => commands::check(&config),
        Commands::Sample {
            x,
            z,
            config,
            heightmap,
            extent,
            height_scale,
        } => {
            let source = commands::SourceArgs {
                config,
                heightmap,
                extent,
                height_scale,
            };
            commands::sample(source, x, z)
        }
        Commands::Fly {
            distance,
            step,
            config,
            heightmap,
            extent,
            height_scale,
        } => {
            let source = commands::SourceArgs {
                config,
                heightmap,
                extent,
                height_scale,
            };
            commands::fly(source, distance, step)
        }
        Commands::Export {
            x,
            z,
            output,
            config,
            heightmap,
            extent,
            height_scale,
        } => {
            let source = commands::SourceArgs {
                config,
                heightmap,
                extent,
                height_scale,
            };
            commands::export(source, x, z, &output)
        }
    }
}
