//! 终端步骤与计时器

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// 未完成计时时的时长
pub const DURATION_UNSET: f64 = -1.0;

/// 计时器
///
/// 由需要计时的结构体组合使用（运行上下文、单个步骤）
#[derive(Clone, Debug, Default)]
pub struct Timer {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl Timer {
    /// 开始计时，清除上一次的结束时间
    pub fn start(&mut self) {
        self.start = Some(Utc::now());
        self.end = None;
    }

    /// 结束计时
    pub fn stop(&mut self) {
        self.end = Some(Utc::now());
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// 时长（秒），开始和结束都记录之前返回 `DURATION_UNSET`
    pub fn duration(&self) -> f64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) => {
                let elapsed = end - start;
                elapsed
                    .num_nanoseconds()
                    .map(|ns| ns as f64 / 1_000_000_000.0)
                    .unwrap_or_else(|| elapsed.num_milliseconds() as f64 / 1_000.0)
            }
            _ => DURATION_UNSET,
        }
    }
}

impl Serialize for Timer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View {
            started_at: Option<DateTime<Utc>>,
            finished_at: Option<DateTime<Utc>>,
            duration: f64,
        }

        View {
            started_at: self.start,
            finished_at: self.end,
            duration: self.duration(),
        }
        .serialize(serializer)
    }
}

/// 终端步骤：一条输入、若干输出行、错误标记和计时
#[derive(Clone, Debug, Serialize)]
pub struct TerminalStep {
    id: String,
    input: String,
    output: Vec<String>,
    error: bool,
    #[serde(flatten)]
    timer: Timer,
}

impl TerminalStep {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            id: format!("command{}", Uuid::new_v4().simple()),
            input: input.into(),
            output: Vec::new(),
            error: false,
            timer: Timer::default(),
        }
    }

    /// 创建带有预设输出的步骤
    pub fn with_output<I, S>(input: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut step = Self::new(input);
        step.output.extend(lines.into_iter().map(Into::into));
        step
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn duration(&self) -> f64 {
        self.timer.duration()
    }

    pub(crate) fn push_output(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    pub(crate) fn set_error(&mut self, error: bool) {
        self.error = error;
    }

    pub(crate) fn timer_mut(&mut self) -> &mut Timer {
        &mut self.timer
    }
}
