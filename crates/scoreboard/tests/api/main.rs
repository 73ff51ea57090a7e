mod helpers;
mod reconciliation;
mod routes;
mod scoring_workflow;
