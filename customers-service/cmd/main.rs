use anyhow::Result;
use customers_service::ApplicationBootstrap;
use petclinic_core::load_config_with_args;
use petclinic_core::logging::init_tracing_from_config;

/// 配置路径：`--config=<path>` 优先，其次环境变量 `PETCLINIC_CONFIG`
fn config_path(args: &[String]) -> Option<String> {
    args.iter()
        .find_map(|arg| arg.strip_prefix("--config=").map(str::to_string))
        .or_else(|| std::env::var("PETCLINIC_CONFIG").ok())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // 加载配置
    let app_config = load_config_with_args(config_path(&args).as_deref(), &args)?;

    init_tracing_from_config(Some(&app_config.logging));

    // 创建应用上下文并启动服务器
    ApplicationBootstrap::run(app_config).await
}
