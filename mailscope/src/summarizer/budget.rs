//! Length budgets per (language, mode, pass).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use common::{BudgetConfig, SummarizerConfig};
use tracing::warn;

use crate::language::{InvalidChoice, Language};

/// How much one summarization call may produce, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBudget {
    pub max_length: usize,
    pub min_length: usize,
}

impl LengthBudget {
    pub const fn new(max_length: usize, min_length: usize) -> Self {
        Self {
            max_length,
            min_length,
        }
    }
}

/// Budgets for the per-chunk passes and for the final refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassBudgets {
    pub first_pass: LengthBudget,
    pub final_pass: LengthBudget,
}

impl From<BudgetConfig> for PassBudgets {
    fn from(cfg: BudgetConfig) -> Self {
        PassBudgets {
            first_pass: LengthBudget::new(cfg.first_max, cfg.first_min),
            final_pass: LengthBudget::new(cfg.final_max, cfg.final_min),
        }
    }
}

/// Caller-selected quality/speed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    #[default]
    Fast,
    Hybrid,
    Llm,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Fast, Mode::Hybrid, Mode::Llm];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Fast => "fast",
            Mode::Hybrid => "hybrid",
            Mode::Llm => "llm",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = InvalidChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "fast" => Ok(Mode::Fast),
            "hybrid" => Ok(Mode::Hybrid),
            "llm" => Ok(Mode::Llm),
            _ => Err(InvalidChoice {
                field: "mode",
                value: s.to_string(),
                expected: "fast, hybrid, llm",
            }),
        }
    }
}

const fn budgets(first: (usize, usize), last: (usize, usize)) -> PassBudgets {
    PassBudgets {
        first_pass: LengthBudget::new(first.0, first.1),
        final_pass: LengthBudget::new(last.0, last.1),
    }
}

/// Built-in budgets. First pass is tighter than final; fast < hybrid < llm.
pub const fn default_budgets(language: Language, mode: Mode) -> PassBudgets {
    match (language, mode) {
        (Language::English, Mode::Fast) => budgets((60, 15), (90, 25)),
        (Language::English, Mode::Hybrid) => budgets((80, 20), (130, 35)),
        (Language::English, Mode::Llm) => budgets((110, 30), (180, 50)),
        (Language::Korean, Mode::Fast) => budgets((48, 12), (72, 20)),
        (Language::Korean, Mode::Hybrid) => budgets((64, 16), (110, 28)),
        (Language::Korean, Mode::Llm) => budgets((90, 24), (150, 40)),
    }
}

/// Built-in budgets plus configured overrides.
#[derive(Debug, Clone, Default)]
pub struct BudgetTable {
    overrides: HashMap<(Language, Mode), PassBudgets>,
}

impl BudgetTable {
    pub fn from_config(cfg: &SummarizerConfig) -> Self {
        let mut overrides = HashMap::new();
        for (lang, modes) in &cfg.budgets {
            let Ok(language) = lang.parse::<Language>() else {
                warn!(language = %lang, "ignoring budget override for unknown language");
                continue;
            };
            for (mode, budget) in modes {
                match mode.parse::<Mode>() {
                    Ok(mode) => {
                        overrides.insert((language, mode), PassBudgets::from(*budget));
                    }
                    Err(e) => warn!(%e, "ignoring budget override"),
                }
            }
        }
        Self { overrides }
    }

    pub fn get(&self, language: Language, mode: Mode) -> PassBudgets {
        self.overrides
            .get(&(language, mode))
            .copied()
            .unwrap_or_else(|| default_budgets(language, mode))
    }
}
