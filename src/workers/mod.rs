pub mod idempotency_sweeper;
