mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kernel::userprog::build_image;
use kernel::{Kernel, KernelConfig};
use kernel_fuse::DiskFile;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use cli::{Cli, Command};

fn main() -> ExitCode {
    let _ = SimpleLogger::new().with_level(LevelFilter::Info).init();
    let cli = Cli::parse();

    let (device, format) = match &cli.command {
        Command::Format => (DiskFile::create(&cli.image), true),
        _ => (DiskFile::open(&cli.image), false),
    };
    let device = match device {
        Ok(device) => Arc::new(device),
        Err(err) => {
            eprintln!("cannot open image {}: {}", cli.image.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let kernel = Kernel::boot(KernelConfig::default(), device, format);

    match cli.command {
        Command::Format => {
            println!("formatted {}", cli.image.display());
            ExitCode::SUCCESS
        }
        Command::CopyIn { source, dest } => copy_in(&kernel, &source, &dest, None),
        Command::PackExec {
            source,
            dest,
            uninit,
        } => copy_in(&kernel, &source, &dest, Some(uninit)),
        Command::List => {
            for path in kernel.fs.list() {
                println!("{}", path);
            }
            ExitCode::SUCCESS
        }
        Command::Check => {
            if kernel.fs.check() {
                println!("file system check succeeded");
                ExitCode::SUCCESS
            } else {
                println!("file system check failed");
                ExitCode::FAILURE
            }
        }
    }
}

fn copy_in(
    kernel: &Arc<Kernel>,
    source: &std::path::Path,
    dest: &str,
    pack_uninit: Option<u32>,
) -> ExitCode {
    let bytes = match std::fs::read(source) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("cannot read {}: {}", source.display(), err);
            return ExitCode::FAILURE;
        }
    };
    let bytes = match pack_uninit {
        Some(uninit) => build_image(0, &bytes, 0, &[], uninit),
        None => bytes,
    };

    if let Err(err) = kernel.fs.create(dest, 0, false) {
        eprintln!("cannot create {}: {}", dest, err);
        return ExitCode::FAILURE;
    }
    let file = match kernel.fs.open(dest) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("cannot open {}: {}", dest, err);
            return ExitCode::FAILURE;
        }
    };
    if file.write(&bytes) != bytes.len() {
        eprintln!("short write to {} (disk full?)", dest);
        return ExitCode::FAILURE;
    }
    println!("{} -> {} ({} bytes)", source.display(), dest, bytes.len());
    ExitCode::SUCCESS
}
