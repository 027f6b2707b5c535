use crate::init::AppContext;

pub async fn handle_index(ctx: &AppContext, force: bool, json: bool) -> anyhow::Result<()> {
    let pipeline = ctx.pipeline(ctx.config.clone());
    let written = pipeline.index_registries(force).await?;
    let version = crate::registries::registry_version();

    if json {
        println!(
            "{}",
            serde_json::json!({ "indexed": written, "registry_version": version })
        );
    } else if written == 0 {
        println!("Registries already indexed (version {version})");
    } else {
        println!("Indexed {written} registry items (version {version})");
    }
    Ok(())
}
