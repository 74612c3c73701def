use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = homekey_reader::config::Config::parse();
    homekey_reader::init_tracing(cfg.verbose);
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            if cfg.wipe {
                homekey_reader::wipe(cfg).await
            } else if let Some(value) = cfg.control_point.clone() {
                homekey_reader::apply_control_point(cfg, value).await
            } else {
                homekey_reader::dump(cfg).await
            }
        })
}
