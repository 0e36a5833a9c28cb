use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "levelstatus", rename_all = "snake_case")]
pub(crate) enum LevelStatus {
    InProgress,
    Recovery,
    AwaitingRenewal,
    Passed,
    Failed,
    Withdrawn,
}

impl LevelStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Recovery => "recovery",
            Self::AwaitingRenewal => "awaiting_renewal",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Dashboard label shown to students and staff.
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::InProgress => "Em curso",
            Self::Recovery => "Recuperação",
            Self::AwaitingRenewal => "✓ Pronto p/ renovar",
            Self::Passed => "Aprovado",
            Self::Failed => "Reprovado",
            Self::Withdrawn => "Desistente",
        }
    }

    pub(crate) fn is_open(self) -> bool {
        matches!(self, Self::InProgress | Self::Recovery)
    }

    /// Open attempts plus the awaiting-renewal bridge; at most one per student and level.
    pub(crate) fn is_current(self) -> bool {
        self.is_open() || self == Self::AwaitingRenewal
    }

    pub(crate) fn counts_as_passed(self) -> bool {
        matches!(self, Self::Passed | Self::AwaitingRenewal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "levelevent", rename_all = "snake_case")]
pub(crate) enum LevelEvent {
    /// Passed a level that has a follow-up; the attempt waits for renewal.
    Pass,
    /// Passed the course's last level.
    Graduate,
    Recover,
    Fail,
    Renew,
    Withdraw,
}

impl LevelEvent {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Graduate => "graduate",
            Self::Recover => "recover",
            Self::Fail => "fail",
            Self::Renew => "renew",
            Self::Withdraw => "withdraw",
        }
    }
}
