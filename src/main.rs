use anyhow::Result;
use visual_grader::utils::logging;
use visual_grader::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env()?;

    // 初始化日志
    logging::init(&config.log_file)?;

    // 初始化并运行应用
    App::initialize(config).await?.run().await
}
