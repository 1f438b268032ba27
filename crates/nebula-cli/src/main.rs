//! nebula CLI - ray queries against mesh documents and one-shot GPU compute runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nebula::{GeometryDocument, Nebula, NebulaConfig, Ray};

#[derive(Parser)]
#[command(name = "nebula")]
#[command(about = "Ray-intersection queries and GPU compute", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace one ray against a mesh document
    Trace {
        /// Mesh document (.json)
        mesh: PathBuf,
        /// Ray origin as x,y,z
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        origin: [f32; 3],
        /// Ray direction as x,y,z
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        dir: [f32; 3],
    },
    /// Trace a batch of rays and print the hits as JSON, in input order
    Batch {
        /// Mesh document (.json)
        mesh: PathBuf,
        /// Rays as a JSON array of {"origin": [x,y,z], "direction": [x,y,z]}
        rays: PathBuf,
    },
    /// Compile and run a WGSL compute program once
    Compute {
        /// WGSL source file
        program: PathBuf,
        /// Raw bytes bound as the input buffer (binding 0)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Bytes to read back from the output buffer (binding 1)
        #[arg(long)]
        output_size: usize,
        /// Workgroup counts as x,y,z
        #[arg(long, value_parser = parse_groups, default_value = "1,1,1")]
        groups: [u32; 3],
        /// Write the output bytes to a file instead of printing them
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the output as little-endian u32 words instead of hex
        #[arg(long)]
        words: bool,
    },
    /// Display information about a mesh document
    Info {
        /// Mesh document (.json)
        mesh: PathBuf,
    },
}

#[derive(Deserialize)]
struct RaySpec {
    origin: [f32; 3],
    direction: [f32; 3],
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => NebulaConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => NebulaConfig::default(),
    };

    match cli.command {
        Commands::Trace { mesh, origin, dir } => {
            trace(config, &mesh, Ray::from_arrays(origin, dir))?;
        }
        Commands::Batch { mesh, rays } => {
            batch(config, &mesh, &rays)?;
        }
        Commands::Compute {
            program,
            input,
            output_size,
            groups,
            out,
            words,
        } => {
            compute(config, &program, input.as_deref(), output_size, groups, out.as_deref(), words)?;
        }
        Commands::Info { mesh } => {
            show_info(&mesh)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_triple<T: std::str::FromStr>(s: &str) -> std::result::Result<[T; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected three comma-separated values, got `{s}`"));
    };
    let parse = |v: &str| v.parse::<T>().map_err(|_| format!("invalid number `{v}`"));
    Ok([parse(x)?, parse(y)?, parse(z)?])
}

fn parse_vec3(s: &str) -> std::result::Result<[f32; 3], String> {
    parse_triple(s)
}

fn parse_groups(s: &str) -> std::result::Result<[u32; 3], String> {
    parse_triple(s)
}

fn read_document(path: &Path) -> Result<GeometryDocument> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    GeometryDocument::from_json(&json).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load `mesh` into a fresh scene.
fn load_scene(nebula: &Nebula, mesh: &Path) -> Result<u64> {
    let doc = read_document(mesh)?;
    let scene = nebula.create_scene()?;
    let stats = nebula.load_document(scene, &doc);
    info!(
        geometries = stats.geometries,
        triangles = stats.triangles,
        "scene loaded from {}",
        mesh.display()
    );
    Ok(scene)
}

fn trace(config: NebulaConfig, mesh: &Path, ray: Ray) -> Result<()> {
    let nebula = Nebula::new(config);
    let scene = load_scene(&nebula, mesh)?;

    let hit = nebula.trace_ray(scene, ray);
    if hit.hit {
        println!(
            "hit: geometry {} triangle {} at distance {}",
            hit.geom_id, hit.prim_id, hit.distance
        );
    } else {
        println!("miss");
    }
    Ok(())
}

fn batch(config: NebulaConfig, mesh: &Path, rays: &Path) -> Result<()> {
    let nebula = Nebula::new(config);
    let scene = load_scene(&nebula, mesh)?;

    let json = fs::read_to_string(rays).with_context(|| format!("failed to read {}", rays.display()))?;
    let specs: Vec<RaySpec> =
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", rays.display()))?;
    let rays: Vec<Ray> = specs
        .iter()
        .map(|spec| Ray::from_arrays(spec.origin, spec.direction))
        .collect();

    let hits = nebula.trace_rays(scene, &rays);
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

fn compute(
    config: NebulaConfig,
    program: &Path,
    input: Option<&Path>,
    output_size: usize,
    groups: [u32; 3],
    out: Option<&Path>,
    words: bool,
) -> Result<()> {
    let source = fs::read_to_string(program)
        .with_context(|| format!("failed to read {}", program.display()))?;
    let input = match input {
        Some(path) => fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        None => Vec::new(),
    };

    let nebula = Nebula::new(config);
    nebula.init_gpu().context("failed to initialize GPU")?;
    let output = nebula.run_program_source(&source, &input, groups, output_size);
    nebula.shutdown_gpu();

    match out {
        Some(path) => {
            fs::write(path, &output).with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", output.len(), path.display());
        }
        None if words => {
            let words: Vec<u32> = bytemuck::pod_collect_to_vec(&output);
            for (i, w) in words.iter().enumerate() {
                println!("{i:>6}: {w}");
            }
        }
        None => print!("{}", hex_dump(&output)),
    }
    Ok(())
}

/// Sixteen bytes per line, prefixed with the offset.
fn hex_dump(bytes: &[u8]) -> String {
    let mut text = String::new();
    for (line, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        text.push_str(&format!("{:08x}  {}\n", line * 16, hex.join(" ")));
    }
    text
}

fn show_info(mesh: &Path) -> Result<()> {
    let doc = read_document(mesh)?;

    println!("mesh document: {}", mesh.display());
    println!("  Meshes: {}", doc.geometry.len());
    println!("  Parts: {}", doc.num_parts());
    println!("  Vertices: {}", doc.num_vertices());
    println!("  Triangles: {}", doc.num_triangles());

    for (i, mesh) in doc.geometry.iter().enumerate() {
        println!("\nMesh {}:", i);
        for (j, part) in mesh.mesh_parts.iter().enumerate() {
            println!(
                "  part {}: {} vertices, {} triangles",
                j,
                part.num_vertices(),
                part.num_triangles()
            );
        }
    }

    Ok(())
}
