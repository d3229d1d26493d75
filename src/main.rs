// 该文件是 Jiance （见测） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod args;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jiance::{
  FromUrl, FromUrlWithScheme,
  input::{InputWrapper, StdinInput},
  model::{Model, negotiate_model},
  output::Outputs,
  pipeline::Pipeline,
  task::{ContinuousTask, InteractiveTask, OneShotTask, Task, install_interrupt_handler},
};

use args::{Args, Mode};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  for output in &args.output {
    info!("输出: {}", output);
  }

  let config = args.detection_config().context("检测参数无效")?;
  info!("检测参数: {}", config);

  let model = negotiate_model(&args.model)
    .into_result()
    .context("模型加载失败")?;
  info!("模型加载完成，共 {} 个类别", model.labels().len());

  let input = InputWrapper::from_url(&args.input).context("打开输入源失败")?;
  let outputs = Outputs::from_urls(&args.output).context("创建输出失败")?;
  let mut pipeline = Pipeline::new(model, config);

  let stats = match args.mode {
    Mode::Oneshot => OneShotTask.run_task(input, &mut pipeline, &outputs)?,
    Mode::Continuous => {
      let stop = install_interrupt_handler()?;
      ContinuousTask::default()
        .with_frame_number(args.frames)
        .with_stop_signal(stop)
        .run_task(input, &mut pipeline, &outputs)?
    }
    Mode::Interactive => {
      if args.input.scheme() == StdinInput::SCHEME {
        bail!("交互模式从标准输入读取指令，输入源不能是 stdin:");
      }
      let stdin = std::io::stdin().lock();
      InteractiveTask::new(stdin, std::io::stdout()).run_task(input, &mut pipeline, &outputs)?
    }
  };

  if stats.succeeded == 0 && stats.failed > 0 {
    bail!("所有 {} 帧处理失败", stats.failed);
  }
  if stats.failed > 0 {
    warn!("{} 帧处理失败", stats.failed);
  }

  Ok(())
}
