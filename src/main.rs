fn main() {
    #[cfg(feature = "cli")]
    covagent::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("covagent: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
