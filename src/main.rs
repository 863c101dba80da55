use anyhow::Result;
use std::io::{self, Write};
use std::num::ParseIntError;
use std::sync::mpsc;

use fall_sentinel::action::{OnnxActionClassifier, WINDOW_CAPACITY};
use fall_sentinel::config::Config;
use fall_sentinel::monitor::{FallMonitor, MonitorEvent};
use fall_sentinel::pose::synthetic::{lying_pose, standing_pose};
use fall_sentinel::pose::PrecomputedPoses;

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Fall Sentinel ({}) - Classifier Test ===", env!("GIT_VERSION"));
    println!("モデル: {}", config.classifier.model_path);
    println!("ラベル: {:?}", config.classifier.labels);
    println!();
    println!("コマンド:");
    println!("  s [n]   - 立位ポーズを n フレーム投入 (既定: {})", WINDOW_CAPACITY);
    println!("  f       - 横たわったポーズを1フレーム投入");
    println!("  e       - 人物なしフレームを投入");
    println!("  r       - ウィンドウをリセット");
    println!("  i       - 統計を表示");
    println!("  q       - 終了");
    println!();

    let classifier = match OnnxActionClassifier::from_config(&config.classifier) {
        Ok(c) => Some(c),
        Err(e) => {
            log::warn!("classifier unavailable: {:#}", e);
            None
        }
    };

    let (tx, rx) = mpsc::channel();
    let mut monitor = FallMonitor::new(PrecomputedPoses, classifier, &config, tx);

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();

        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "s" => {
                let n = match parse_count(parts.get(1).copied()) {
                    Ok(n) => n,
                    Err(e) => {
                        println!("不正なフレーム数: {} ({})", parts[1], e);
                        continue;
                    }
                };
                for i in 0..n {
                    // わずかに揺らして静止画にならないようにする
                    let sway = ((i % 10) as f32 - 5.0) * 0.002;
                    monitor.process_frame(&Some(standing_pose(sway)));
                }
                println!("{} フレーム投入 (window: {})", n, monitor.window().len());
            }
            "f" => {
                monitor.process_frame(&Some(lying_pose()));
                println!("投入しました (window: {})", monitor.window().len());
            }
            "e" => {
                monitor.process_frame(&None);
                println!("人物なし");
            }
            "r" => {
                monitor.reset();
                println!("リセットしました");
            }
            "i" => {
                println!("{:?}", monitor.stats());
            }
            "q" => {
                println!("終了します");
                break;
            }
            _ => {
                println!("不明なコマンド: {}", parts[0]);
            }
        }

        // 最後の分類結果とアラートだけ表示
        let mut last = None;
        for event in rx.try_iter() {
            match event {
                MonitorEvent::Classification { frame, result } => last = Some((frame, result)),
                MonitorEvent::FallAlert { frame, confidence } => {
                    println!("  !! 転倒検知 frame={} ({:.1}%)", frame, confidence * 100.0);
                }
                MonitorEvent::Points { .. } => {}
            }
        }
        if let Some((frame, result)) = last {
            println!("  frame={} {} ({:.1}%)", frame, result.label, result.confidence * 100.0);
        }
    }

    Ok(())
}

/// `s` コマンドのフレーム数（省略時はウィンドウ長）
fn parse_count(arg: Option<&str>) -> Result<usize, ParseIntError> {
    match arg {
        Some(v) => v.parse(),
        None => Ok(WINDOW_CAPACITY),
    }
}
