use crate::acme::{Authorization, Status};
use crate::challenge::targeted_domain;
use crate::error::{Error, ObtainError};
use crate::resolver::{Solver, SolverManager};

struct Selected<'a> {
    domain: String,
    authz: &'a Authorization,
    solver: &'a Solver,
}

impl SolverManager {
    /// Solve a challenge for every authorization that isn't valid yet.
    ///
    /// Solvers whose provider asks for sequential handling run one domain at a time after all
    /// others. A failure for one domain never stops work on the others.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Obtain`] keyed by every domain that couldn't be validated.
    pub async fn solve(&self, authzs: &[Authorization]) -> Result<(), Error> {
        let mut failures = ObtainError::new();
        let mut parallel = Vec::new();
        let mut sequential = Vec::new();

        for authz in authzs {
            let domain = targeted_domain(authz);
            if authz.status == Status::Valid {
                tracing::info!("[{domain}] acme: authorization already valid; skipping challenge");
                continue;
            }
            match self.choose_solver(authz) {
                Some(solver) if solver.sequential().is_some() => {
                    sequential.push(Selected { domain, authz, solver });
                }
                Some(solver) => parallel.push(Selected { domain, authz, solver }),
                None => failures.insert(domain.clone(), Error::NoSolver(domain)),
            }
        }

        solve_batch(&parallel, &mut failures).await;
        solve_sequentially(&sequential, &mut failures).await;

        failures.into_result()
    }
}

/// Pre-solve everything first so DNS records get the longest time to propagate, then solve,
/// then clean up whatever didn't fail along the way.
async fn solve_batch(selected: &[Selected<'_>], failures: &mut ObtainError) {
    for s in selected.iter().filter(|s| s.solver.supports_pre_solve()) {
        if let Err(err) = s.solver.pre_solve(s.authz).await {
            failures.insert(s.domain.clone(), err);
        }
    }

    for s in selected {
        if failures.contains(&s.domain) {
            continue;
        }
        if let Err(err) = s.solver.solve(s.authz).await {
            failures.insert(s.domain.clone(), err);
        }
    }

    for s in selected {
        if failures.contains(&s.domain) {
            continue;
        }
        clean_up(s).await;
    }
}

async fn solve_sequentially(selected: &[Selected<'_>], failures: &mut ObtainError) {
    for (i, s) in selected.iter().enumerate() {
        if s.solver.supports_pre_solve() {
            if let Err(err) = s.solver.pre_solve(s.authz).await {
                failures.insert(s.domain.clone(), err);
                clean_up(s).await;
                continue;
            }
        }

        let res = s.solver.solve(s.authz).await;
        clean_up(s).await;
        if let Err(err) = res {
            failures.insert(s.domain.clone(), err);
            continue;
        }

        if i + 1 < selected.len() {
            if let Some(interval) = s.solver.sequential() {
                tracing::info!("sequence: wait for {interval:?}");
                tokio::time::sleep(interval).await;
            }
        }
    }
}

async fn clean_up(s: &Selected<'_>) {
    if let Err(err) = s.solver.clean_up(s.authz).await {
        tracing::warn!("[{}] acme: cleaning up failed: {err}", s.domain);
    }
}
