//! Manifest inspection tool
//!
//! Loads a library manifest (the bundled reference manifest by default),
//! creates an instance of one method at a resolution and prints the instance
//! description together with the first frame's dispatch schedule.

use clap::Parser;
use denoiser_wgpu::DenoisingMethod;
use denoiser_wgpu::library::{CommonSettings, FilteringLibrary, InstanceCreationDesc, MethodDesc, SystemAllocator};
use denoiser_wgpu_manifest::ManifestLibrary;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version, about = "Prints the instance a library manifest produces")]
struct Args {
    /// Denoising method, e.g. RelaxDiffuseSpecular
    method: DenoisingMethod,

    /// Instance width in pixels
    #[arg(long, default_value_t = 1920)]
    width: u16,

    /// Instance height in pixels
    #[arg(long, default_value_t = 1080)]
    height: u16,

    /// Manifest file; the reference manifest is used when omitted
    #[arg(long, short)]
    manifest: Option<PathBuf>,

    /// Print the instance description as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).with_writer(std::io::stderr).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error installing log subscriber: {e}");
    }

    let library = match &args.manifest {
        Some(path) => ManifestLibrary::from_file(path),
        None => ManifestLibrary::reference(),
    };
    let library = library.unwrap_or_else(|e| {
        eprintln!("Error loading manifest: {e}");
        process::exit(1);
    });

    let allocator = Arc::new(SystemAllocator::new());
    let mut instance = library
        .create_instance(InstanceCreationDesc {
            method: MethodDesc {
                method: args.method.library_method(),
                full_resolution_width: args.width,
                full_resolution_height: args.height,
            },
            allocator,
        })
        .unwrap_or_else(|e| {
            eprintln!("Error creating {} instance: {e}", args.method);
            process::exit(1);
        });

    let desc = library.instance_desc(&instance);
    if args.json {
        match serde_json::to_string_pretty(desc) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing instance description: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("{desc:#?}");
    }

    let settings = CommonSettings {
        resolution: [u32::from(args.width), u32::from(args.height)],
        ..CommonSettings::default()
    };
    match library.compute_dispatches(&mut instance, &settings) {
        Ok(dispatches) => {
            for dispatch in &dispatches {
                eprintln!(
                    "{:<24} pipeline {:>2}  grid {:>4}x{:<4}  resources {:>2}  constants {} bytes",
                    dispatch.name,
                    dispatch.pipeline_index,
                    dispatch.grid_width,
                    dispatch.grid_height,
                    dispatch.resources.len(),
                    dispatch.constant_buffer_data.len()
                );
            }
        }
        Err(e) => {
            eprintln!("Error computing dispatches: {e}");
            process::exit(1);
        }
    }

    library.destroy_instance(instance);
}
