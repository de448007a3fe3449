//! Session wiring: one loaded panel, the aggregates computed once at startup,
//! and the selection state advanced one event at a time.

use serde::Serialize;

use crate::logging::log_selection;
use crate::panel::{ranked_ids, ProviderPanel};
use crate::state::{reduce, Config, DashboardState, Event, ReduceContext};
use crate::views::{
    provider_view, stability_view, top_risk_board, ProviderOutcome, StabilityOutcome, TopRiskBoard,
};

pub struct Dashboard {
    panel: ProviderPanel,
    cfg: Config,
    ranked_ids: Vec<String>,
    board: TopRiskBoard,
    state: DashboardState,
}

/// Everything a host needs to draw one frame.
#[derive(Debug, Serialize)]
pub struct Snapshot<'a> {
    pub state: &'a DashboardState,
    pub board: &'a TopRiskBoard,
    pub provider: ProviderOutcome,
    pub stability: StabilityOutcome,
}

impl Dashboard {
    pub fn new(panel: ProviderPanel, cfg: Config) -> Self {
        let ranked_ids = ranked_ids(&panel.rank_providers());
        let board = top_risk_board(&panel, cfg.top_n);
        let state = DashboardState::initial(&ranked_ids);
        Self {
            panel,
            cfg,
            ranked_ids,
            board,
            state,
        }
    }

    pub fn board(&self) -> &TopRiskBoard {
        &self.board
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn handle(&mut self, event: Event) -> &DashboardState {
        let name = event.name();
        let ctx = ReduceContext {
            ranked_ids: &self.ranked_ids,
            board: &self.board,
        };
        self.state = reduce(&self.state, event, &ctx);
        log_selection(
            name,
            &self.state.search,
            self.state.selected.as_deref(),
            self.state.options.len(),
        );
        &self.state
    }

    fn selected(&self) -> &str {
        self.state.selected.as_deref().unwrap_or("")
    }

    pub fn current_view(&self) -> ProviderOutcome {
        provider_view(&self.panel, self.selected(), self.cfg.anomaly_hours)
    }

    pub fn current_stability(&self) -> StabilityOutcome {
        stability_view(&self.panel, self.selected())
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            state: &self.state,
            board: &self.board,
            provider: self.current_view(),
            stability: self.current_stability(),
        }
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::from("# Provider Risk Dashboard\n\n");
        out.push_str(&self.board.to_markdown());
        out.push_str(&format!(
            "\n**Search Provider:** `{}`  **Select Provider:** `{}` ({} options)\n\n",
            self.state.search,
            self.selected(),
            self.state.options.len()
        ));
        out.push_str(&self.current_view().to_markdown());
        out.push('\n');
        out.push_str(&self.current_stability().to_markdown());
        out
    }
}
