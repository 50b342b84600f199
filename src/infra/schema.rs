//! SQL layout of the persisted tables, for relational backends.

/// Schema version produced by [`MIGRATIONS`].
pub const CURRENT_VERSION: i32 = 1;

/// Ordered migration statements (PostgreSQL dialect).
pub const MIGRATIONS: &[&str] = &[r"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    email TEXT UNIQUE,
    role TEXT NOT NULL CHECK (role IN ('user', 'admin'))
);

CREATE TABLE IF NOT EXISTS lots (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT NOT NULL,
    postal_code TEXT NOT NULL,
    hourly_rate NUMERIC(12, 2) NOT NULL CHECK (hourly_rate > 0),
    spot_count INTEGER NOT NULL CHECK (spot_count >= 0)
);

CREATE TABLE IF NOT EXISTS spots (
    id BIGSERIAL PRIMARY KEY,
    lot_id BIGINT NOT NULL REFERENCES lots (id),
    status TEXT NOT NULL CHECK (status IN ('available', 'occupied'))
);
CREATE INDEX IF NOT EXISTS idx_spots_lot ON spots (lot_id, id);

CREATE TABLE IF NOT EXISTS reservations (
    id BIGSERIAL PRIMARY KEY,
    spot_id BIGINT NOT NULL REFERENCES spots (id),
    user_id BIGINT NOT NULL REFERENCES users (id),
    started_at TIMESTAMPTZ NOT NULL,
    ended_at TIMESTAMPTZ,
    cost NUMERIC(12, 2) NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_reservations_user ON reservations (user_id, started_at DESC);
CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_open_spot
    ON reservations (spot_id) WHERE ended_at IS NULL;

CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    kind TEXT NOT NULL,
    payload JSONB NOT NULL,
    schedule JSONB NOT NULL,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    last_error TEXT,
    run_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (state, run_at);
"];
