pub mod args;
mod host;
mod setup;
mod viewer;

pub use args::AppArgs;

use anyhow::Result;

pub async fn launch() -> Result<()> {
    launch_with_args(AppArgs::from_cli()).await
}

pub async fn launch_with_args(args: AppArgs) -> Result<()> {
    let setup::PreparedApp {
        args,
        config,
        filter,
    } = setup::prepare(args)?;

    if args.recover {
        setup::configure_plain_logging();
        viewer::run(config, &filter, args.export.as_deref())
    } else {
        host::run(config, &filter, args.export.as_deref()).await
    }
}
