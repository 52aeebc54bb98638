use std::env;
use std::process;
use std::time::Duration;

use getopts::Options;

use vane::ddns::context::ServerContext;
use vane::ddns::shutdown::Shutdown;
use vane::providers;
use vane::web::server::ApiServer;

const DEFAULT_CACHE_LIFETIME: u64 = 600;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Main entry point for the Vane record server
fn main() {
    simple_logger::init_with_level(log::Level::Info).expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "d",
        "data-dir",
        "Directory holding the role/ and registry/ definitions",
        "DIRECTORY",
    );
    opts.optopt(
        "l",
        "http-listen",
        "HTTP listen address (e.g. [::]:8053)",
        "ADDR",
    );
    opts.optopt(
        "p",
        "http-prefix",
        "HTTP REST API route prefix",
        "PREFIX",
    );
    opts.optopt(
        "t",
        "cache-lifetime",
        "Definition cache lifetime in seconds",
        "SECONDS",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            log::error!("{}", f);
            process::exit(1);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let data_dir = match opt_matches.opt_str("d") {
        Some(dir) => dir,
        None => {
            log::error!("A data directory is required (-d)");
            print_usage(&program, opts);
            process::exit(1);
        }
    };

    let http_listen = match opt_matches.opt_str("l") {
        Some(listen) => listen,
        None => {
            log::error!("An HTTP listen address is required (-l)");
            print_usage(&program, opts);
            process::exit(1);
        }
    };

    let http_prefix = opt_matches.opt_str("p").unwrap_or_else(|| "/".to_string());

    let cache_lifetime = match opt_matches.opt_str("t") {
        Some(seconds) => match seconds.parse::<u64>() {
            Ok(seconds) => seconds,
            Err(_) => {
                log::error!("Cache lifetime is not a number: {}", seconds);
                process::exit(1);
            }
        },
        None => DEFAULT_CACHE_LIFETIME,
    };

    let mut context = ServerContext::new(
        &data_dir,
        Duration::from_secs(cache_lifetime),
        &http_listen,
        &http_prefix,
    );
    providers::register_builtin(&mut context.builders);

    if let Err(e) = context.initialize() {
        log::error!("Server failed to initialize: {}", e);
        process::exit(1);
    }

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers();

    let server = ApiServer::new(context.into_shared());
    if let Err(e) = server.run(&shutdown) {
        log::error!("{}", e);
        process::exit(1);
    }
}
