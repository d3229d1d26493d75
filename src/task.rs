// 该文件是 Jiance （见测） 项目的一部分。
// src/task.rs - 采集循环任务
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

use std::{
  io::{BufRead, Write},
  sync::mpsc::{Receiver, channel},
  thread,
  time::Duration,
};

use anyhow::{Context, anyhow};
use tracing::{error, info, warn};

use crate::{input::EncodedImage, model::Model, output::Render, pipeline::Pipeline};

/// 任务结束时的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
  pub succeeded: usize,
  pub failed: usize,
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: &mut Pipeline<M>, output: &O)
  -> Result<TaskStats, Self::Error>;
}

/// 处理一帧；失败只记录日志，不中止任务
fn run_frame<M, O>(
  pipeline: &mut Pipeline<M>,
  capture: &EncodedImage,
  output: &O,
  stats: &mut TaskStats,
) where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  match pipeline.process(capture, output) {
    Ok(_) => stats.succeeded += 1,
    Err(e) => {
      error!("处理 {} 失败: {}", capture.source, e);
      stats.failed += 1;
    }
  }
}

/// 安装 Ctrl-C 处理函数，返回中断信号接收端
pub fn install_interrupt_handler() -> anyhow::Result<Receiver<()>> {
  let (tx, rx) = channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("设置 Ctrl-C 处理函数失败")?;

  Ok(rx)
}

pub struct OneShotTask;

impl<E, I, M, O> Task<I, M, O> for OneShotTask
where
  E: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = Result<EncodedImage, E>>,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &mut Pipeline<M>,
    output: &O,
  ) -> Result<TaskStats, Self::Error> {
    info!("开始任务...");
    let capture = input
      .next()
      .ok_or_else(|| anyhow!("没有输入帧"))?
      .context("获取输入帧失败")?;

    let mut stats = TaskStats::default();
    run_frame(pipeline, &capture, output, &mut stats);
    info!("任务完成，退出");
    Ok(stats)
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }

  fn stop_requested(&self) -> bool {
    self.stop.as_ref().is_some_and(|rx| rx.try_recv().is_ok())
  }
}

impl<E, I, M, O> Task<I, M, O> for ContinuousTask
where
  E: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = Result<EncodedImage, E>>,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    pipeline: &mut Pipeline<M>,
    output: &O,
  ) -> Result<TaskStats, Self::Error> {
    info!("开始任务...");
    let mut stats = TaskStats::default();

    for (index, capture) in input.enumerate() {
      info!("处理第 {} 帧图像", index + 1);
      match capture {
        Ok(capture) => run_frame(pipeline, &capture, output, &mut stats),
        Err(e) => {
          error!("获取输入帧失败: {}", e);
          stats.failed += 1;
        }
      }

      if self.frame_number.is_some_and(|n| index + 1 >= n) {
        info!("达到指定帧数 {}, 退出任务循环", index + 1);
        break;
      }
      if self.stop_requested() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!(
      "任务完成，成功 {} 帧，失败 {} 帧",
      stats.succeeded, stats.failed
    );
    Ok(stats)
  }
}

/// 交互模式：回车拍摄一帧，`r` 用当前参数重新检测上一帧，`key=value` 调整参数，`q` 退出
pub struct InteractiveTask<R, W> {
  reader: R,
  writer: W,
}

impl<R: BufRead, W: Write> InteractiveTask<R, W> {
  pub fn new(reader: R, writer: W) -> Self {
    Self { reader, writer }
  }
}

impl<R, W, E, I, M, O> Task<I, M, O> for InteractiveTask<R, W>
where
  R: BufRead,
  W: Write,
  E: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = Result<EncodedImage, E>>,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    mut self,
    mut input: I,
    pipeline: &mut Pipeline<M>,
    output: &O,
  ) -> Result<TaskStats, Self::Error> {
    info!("开始交互任务...");
    let mut stats = TaskStats::default();
    let mut line = String::new();
    let mut last: Option<EncodedImage> = None;

    loop {
      write!(
        self.writer,
        "[{}] 回车拍摄, r 重新检测, key=value 调整参数, q 退出 > ",
        pipeline.config()
      )?;
      self.writer.flush()?;

      line.clear();
      if self.reader.read_line(&mut line)? == 0 {
        break;
      }

      match line.trim() {
        "" => match input.next() {
          Some(Ok(capture)) => {
            run_frame(pipeline, &capture, output, &mut stats);
            last = Some(capture);
          }
          Some(Err(e)) => {
            error!("获取输入帧失败: {}", e);
            stats.failed += 1;
          }
          None => {
            writeln!(self.writer, "输入源已耗尽, 可用 r 重新检测上一帧")?;
          }
        },
        "r" | "rerun" => match &last {
          Some(capture) => run_frame(pipeline, capture, output, &mut stats),
          None => writeln!(self.writer, "还没有拍摄过图像")?,
        },
        "q" | "quit" => break,
        setting => match pipeline.config().apply_setting(setting) {
          Ok(config) => pipeline.set_config(config),
          Err(e) => writeln!(self.writer, "参数无效: {}", e)?,
        },
      }
    }

    info!(
      "交互任务结束，成功 {} 帧，失败 {} 帧",
      stats.succeeded, stats.failed
    );
    Ok(stats)
  }
}
