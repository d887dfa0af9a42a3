use indoc::indoc;

use super::PgQueueMigration;

pub const M000001_MIGRATION: PgQueueMigration = PgQueueMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :PGQUEUE_SCHEMA.queue (
                ns text not null,
                queue text not null,
                ttl interval default interval '1 hour',
                retries integer not null default 3 check (retries >= 0),
                retry_delay interval not null default interval '2 minutes',
                primary key (ns, queue)
            );
        "#},
        indoc! {r#"
            create table :PGQUEUE_SCHEMA.task (
                id bigserial primary key,
                ns text not null,
                queue text not null,
                payload jsonb not null default '{}',
                result jsonb not null default 'null',
                worker text,
                created_at timestamptz not null default now(),
                delayed_at timestamptz,
                started_at timestamptz,
                finished_at timestamptz,
                dies_at timestamptz,
                retries integer not null,
                initial_retries integer not null,
                foreign key (ns, queue) references :PGQUEUE_SCHEMA.queue (ns, queue)
                    on update cascade on delete cascade
            );
        "#},
        indoc! {r#"
            create index task_ns_queue_idx on :PGQUEUE_SCHEMA.task (ns, queue);
        "#},
        indoc! {r#"
            create index task_ns_created_at_unstarted_idx
                on :PGQUEUE_SCHEMA.task (ns, created_at)
                where started_at is null and finished_at is null and retries > 0;
        "#},
        indoc! {r#"
            create table :PGQUEUE_SCHEMA.ticker (
                ns text not null,
                ticker text not null,
                "interval" interval default interval '1 minute',
                ts timestamptz,
                primary key (ns, ticker)
            );
        "#},
        indoc! {r#"
            create type :PGQUEUE_SCHEMA.status as enum (
                'expired', 'new', 'failed', 'retry', 'retained', 'released', 'unknown'
            );
        "#},
    ],
};
