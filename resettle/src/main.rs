use log::LevelFilter;
use resettle::{logging, Args};
use structopt::StructOpt;

fn main() {
    let args = Args::from_args();
    let options = logging::Options {
        level: if args.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Info
        },
        colored: !args.no_color,
    };
    let _ = logging::init(options);

    if let Err(err) = resettle::run(args) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
