use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;

use beltmill::bootstrap;
use beltmill::bytecode::Dialect;
use beltmill::host::Console;
use beltmill::image;
use beltmill::interp::Interp;
use beltmill::machine::Machine;
use beltmill::mill::{MillConfig, MillCore, ParallelCore};

/// A belt-machine emulator. Runs a `Prog` or `Core` image, or the embedded
/// hello-world bootstrap when no image is given; the image magic selects
/// the single-unit or multi-unit core.
#[derive(Parser)]
#[command(name = "beltmill", version)]
struct Args {
  /// Path to an image file.
  image: Option<PathBuf>,

  /// Run the multi-unit core on the calling thread instead of unit workers.
  #[arg(long)]
  serial: bool,
}

fn main() {
  env_logger::init();
  std::process::exit(run(Args::parse()));
}

fn run(args: Args) -> i32 {
  let (mut machine, dialect) = match &args.image {
    Some(path) => match image::load_file(path) {
      Ok(loaded) => loaded,
      Err(error) => {
        eprintln!("{}", error);
        return 1;
      }
    },
    None => (bootstrap::hello_world(), Dialect::Linear),
  };

  let mut host = Console;
  match dialect {
    Dialect::Linear => {
      Interp::new(&mut machine, &mut host).run();
    }
    Dialect::Mill if args.serial => {
      MillCore::new(&mut machine, &mut host, MillConfig::default()).run();
    }
    Dialect::Mill => {
      let core = ParallelCore::new(machine, MillConfig::default());
      core.run(&mut host);
      machine = core.into_machine();
    }
  }

  if machine.invalid_op {
    // The termination cause has already been reported; leave the operator
    // the state it died in.
    eprintln!("{}", machine);
  }

  write_snapshot(&machine, dialect);
  0
}

fn write_snapshot(machine: &Machine, dialect: Dialect) {
  let path = Path::new(image::SNAPSHOT_FILE);
  match image::write_snapshot_file(path, machine, dialect) {
    Ok(())     => info!("snapshot written to {}", path.display()),
    Err(error) => eprintln!("cannot write {}: {}", path.display(), error),
  }
}
