use crate::init::AppContext;

pub fn handle_config(ctx: &AppContext) -> anyhow::Result<()> {
    println!("# data path: {}", ctx.data_path.display());
    println!("{}", toml::to_string_pretty(&ctx.config)?);
    Ok(())
}
