//! Promotion rule evaluation.
//!
//! The policy is a table of grade-level bands, each carrying one rule. Bands are
//! data (stored under `setup.promotion`), so a change in regulation is a settings
//! edit rather than a code change. [`PromotionPolicy::evaluate`] is pure.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    Promote,
    Retain,
    Graduate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalMark {
    pub subject_id: String,
    pub mark: i64,
}

/// Whether each distinguished subject is among the student's negatives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistinguishedNegatives {
    pub first_language: bool,
    pub mathematics: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BandRule {
    /// Retain when negatives exceed `max`.
    MaxNegatives { max: usize },
    /// Retain when negatives exceed `max`; at exactly `max`, retain only if
    /// both distinguished subjects are negative.
    CoreSubjectTieBreak { max: usize },
    /// Retain when negatives exceed `max` or any single mark is below `critical_below`.
    #[serde(rename_all = "camelCase")]
    CriticalFloor { max: usize, critical_below: i64 },
    /// Final level: retain when negatives exceed `max`, otherwise graduate.
    Terminal { max: usize },
}

impl BandRule {
    fn decide(&self, negatives: usize, finals: &[FinalMark], flags: DistinguishedNegatives) -> Decision {
        match *self {
            BandRule::MaxNegatives { max } => {
                if negatives > max {
                    Decision::Retain
                } else {
                    Decision::Promote
                }
            }
            BandRule::CoreSubjectTieBreak { max } => {
                if negatives > max || (negatives == max && flags.first_language && flags.mathematics) {
                    Decision::Retain
                } else {
                    Decision::Promote
                }
            }
            BandRule::CriticalFloor { max, critical_below } => {
                let critical = finals.iter().any(|f| f.mark < critical_below);
                if negatives > max || critical {
                    Decision::Retain
                } else {
                    Decision::Promote
                }
            }
            BandRule::Terminal { max } => {
                if negatives > max {
                    Decision::Retain
                } else {
                    Decision::Graduate
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBand {
    pub min_grade: i64,
    pub max_grade: i64,
    pub rule: BandRule,
}

impl RuleBand {
    fn covers(&self, grade_level: i64) -> bool {
        (self.min_grade..=self.max_grade).contains(&grade_level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromotionPolicy {
    /// A final mark strictly below this counts as a negative.
    pub pass_mark: i64,
    pub bands: Vec<RuleBand>,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            pass_mark: 10,
            bands: vec![
                RuleBand {
                    min_grade: 5,
                    max_grade: 8,
                    rule: BandRule::MaxNegatives { max: 3 },
                },
                RuleBand {
                    min_grade: 9,
                    max_grade: 9,
                    rule: BandRule::CoreSubjectTieBreak { max: 2 },
                },
                RuleBand {
                    min_grade: 10,
                    max_grade: 11,
                    rule: BandRule::CriticalFloor {
                        max: 2,
                        critical_below: 6,
                    },
                },
                RuleBand {
                    min_grade: 12,
                    max_grade: 12,
                    rule: BandRule::Terminal { max: 0 },
                },
            ],
        }
    }
}

impl PromotionPolicy {
    pub fn validate(&self) -> Result<(), String> {
        for (i, band) in self.bands.iter().enumerate() {
            if band.min_grade > band.max_grade {
                return Err(format!(
                    "band {i}: minGrade {} is greater than maxGrade {}",
                    band.min_grade, band.max_grade
                ));
            }
            for (j, other) in self.bands.iter().enumerate().skip(i + 1) {
                if band.min_grade <= other.max_grade && other.min_grade <= band.max_grade {
                    return Err(format!("bands {i} and {j} overlap"));
                }
            }
        }
        Ok(())
    }

    pub fn band_for(&self, grade_level: i64) -> Option<&RuleBand> {
        self.bands.iter().find(|b| b.covers(grade_level))
    }

    pub fn is_terminal(&self, grade_level: i64) -> bool {
        matches!(
            self.band_for(grade_level).map(|b| &b.rule),
            Some(BandRule::Terminal { .. })
        )
    }

    pub fn negatives(&self, finals: &[FinalMark]) -> usize {
        finals.iter().filter(|f| f.mark < self.pass_mark).count()
    }

    /// Levels without a band fall through to `Promote`; callers report those as policy gaps.
    pub fn evaluate(
        &self,
        grade_level: i64,
        finals: &[FinalMark],
        flags: DistinguishedNegatives,
    ) -> Decision {
        match self.band_for(grade_level) {
            Some(band) => band.rule.decide(self.negatives(finals), finals, flags),
            None => Decision::Promote,
        }
    }
}
