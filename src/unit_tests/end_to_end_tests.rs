//! End-to-end tests over a fixture database.
//!
//! Each test builds a small SQLite file with the production schema in a
//! temporary directory, then runs the full stack against it: object store,
//! paged reader, VFS, engine worker, cache, catalog. The worker thread
//! drives its reads through the test runtime, so every test here uses the
//! multi-threaded flavor.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rusqlite::Connection;
    use tempfile::TempDir;

    use crate::catalog;
    use crate::error::{QueryError, ReaderError};
    use crate::query_facade::QueryClient;
    use crate::remote_source::RemoteSource;

    /// Builds the fixture database and returns its location. The returned
    /// directory must stay alive for the duration of the test.
    fn fixture_database() -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bsfree.db");
        let conn = Connection::open(&path).unwrap();

        conn.execute_batch(
            "
            create table systems (
                id integer primary key,
                name text not null,
                group_id integer not null,
                qty integer not null
            );
            create table devices (
                id integer primary key,
                name text not null
            );
            create table games (
                id integer primary key,
                game_id integer not null,
                name text not null,
                version text,
                system_id integer not null,
                device_id integer not null,
                qty integer not null
            );
            create table sections (
                id integer primary key,
                name text not null
            );
            create table authors (
                id integer primary key,
                name text not null
            );
            create table codes (
                id integer primary key,
                name text not null,
                note text,
                code text not null,
                section_id integer,
                author_id integer,
                game_uid integer not null
            );

            insert into systems (id, name, group_id, qty) values
                (1, 'Game Boy', 1, 3),
                (2, 'Game Boy Color', 1, 5),
                (3, 'Dreamcast', 3, 2);

            insert into devices (id, name) values
                (1, 'Action Replay'),
                (2, 'GameShark');

            insert into games (id, game_id, name, version, system_id, device_id, qty) values
                (10, 100, 'Zelda', null, 1, 1, 2),
                (11, 100, 'Zelda', 'v1.1', 2, 2, 1),
                (12, 101, 'Adventure', null, 1, 1, 3),
                (13, 102, 'Empty Game', null, 1, 1, 0);

            insert into sections (id, name) values
                (4, 'Armor'),
                (5, 'Items');

            insert into authors (id, name) values
                (1, 'alice');

            insert into codes (id, name, note, code, section_id, author_id, game_uid) values
                (1, 'Infinite Lives', null, '0100FF', null, 1, 10),
                (2, 'All Swords', 'Jump &amp; Run<br>Use at own risk', '0200AA', 5, 1, 10),
                (3, 'All Shields', null, '0300BB', 5, null, 10),
                (4, 'Gold Armor', null, '0400CC', 4, null, 10);
            ",
        )
        .unwrap();
        drop(conn);

        let location = path.to_string_lossy().into_owned();
        (dir, location)
    }

    fn fixture_client() -> (TempDir, QueryClient) {
        let (dir, location) = fixture_database();
        let client = QueryClient::new(RemoteSource::new(&location));
        (dir, client)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn systems_are_rolled_up_per_group() {
        let (_dir, client) = fixture_client();

        let systems = catalog::get_systems(&client).await.unwrap();
        assert_eq!(systems.len(), 2);

        // Ordered by name: Dreamcast before Game Boy
        assert_eq!(systems[0].id, 3);
        assert_eq!(systems[0].name, "Dreamcast");
        assert_eq!(systems[0].qty, 2);

        // Group 1 takes the lexicographically smallest member name and the
        // summed quantity of both members
        assert_eq!(systems[1].id, 1);
        assert_eq!(systems[1].name, "Game Boy");
        assert_eq!(systems[1].qty, 8);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn name_lookups_return_none_for_unknown_ids() {
        let (_dir, client) = fixture_client();

        assert_eq!(
            catalog::get_system_name(&client, 1).await.unwrap(),
            Some("Game Boy".to_string())
        );
        assert_eq!(catalog::get_system_name(&client, 999).await.unwrap(), None);

        assert_eq!(
            catalog::get_game_name(&client, 10).await.unwrap(),
            Some("Zelda".to_string())
        );
        assert_eq!(catalog::get_game_name(&client, 999).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn games_listing_orders_and_filters() {
        let (_dir, client) = fixture_client();

        let games = catalog::get_games(&client, 1).await.unwrap();

        // Game 13 has qty 0 and is dropped; the rest sort by name first
        assert_eq!(games.len(), 3);
        assert_eq!(games[0].name, "Adventure");
        assert_eq!(games[0].uid, 12);
        assert_eq!(games[1].name, "Zelda");
        assert_eq!(games[2].name, "Zelda");

        let zelda_gb = games.iter().find(|g| g.uid == 10).unwrap();
        assert_eq!(zelda_gb.id, 100);
        assert_eq!(zelda_gb.version, None);
        assert_eq!(zelda_gb.system.name, "Game Boy");
        assert_eq!(zelda_gb.device.name, "Action Replay");
        assert_eq!(zelda_gb.qty, 2);

        let zelda_gbc = games.iter().find(|g| g.uid == 11).unwrap();
        assert_eq!(zelda_gbc.version.as_deref(), Some("v1.1"));
        assert_eq!(zelda_gbc.system.name, "Game Boy Color");
        assert_eq!(zelda_gbc.device.name, "GameShark");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn codes_listing_groups_sections_in_id_order() {
        let (_dir, client) = fixture_client();

        let list = catalog::get_codes_list(&client, 10).await.unwrap();

        // Sectionless codes come out flat
        assert_eq!(list.codes.len(), 1);
        assert_eq!(list.codes[0].name, "Infinite Lives");
        assert_eq!(list.codes[0].code, "0100FF");
        assert_eq!(list.codes[0].author.as_ref().unwrap().name, "alice");

        // Sections ascend by id: Armor (4) before Items (5)
        assert_eq!(list.sections.len(), 2);
        assert_eq!(list.sections[0].name, "Armor");
        assert_eq!(list.sections[0].codes.len(), 1);
        assert_eq!(list.sections[1].name, "Items");
        assert_eq!(list.sections[1].codes.len(), 2);

        // Codes keep id order inside their section; the author record is
        // shared with the sectionless code
        let items = &list.sections[1];
        assert_eq!(items.codes[0].name, "All Swords");
        assert_eq!(
            items.codes[0].author.as_ref().unwrap(),
            list.codes[0].author.as_ref().unwrap()
        );
        assert_eq!(items.codes[1].name, "All Shields");
        assert_eq!(items.codes[1].author, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stored_markup_is_decoded_on_the_way_out() {
        let (_dir, client) = fixture_client();

        let list = catalog::get_codes_list(&client, 10).await.unwrap();
        let swords = &list.sections[1].codes[0];
        assert_eq!(
            swords.note.as_deref(),
            Some("Jump & Run\nUse at own risk")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_game_yields_empty_listing() {
        let (_dir, client) = fixture_client();

        let list = catalog::get_codes_list(&client, 999).await.unwrap();
        assert!(list.codes.is_empty());
        assert!(list.sections.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_statements_hit_the_session_cache() {
        let (_dir, client) = fixture_client();

        let first = client
            .exec("select id, name from systems order by id", vec![])
            .await
            .unwrap();
        let second = client
            .exec("select id, name from systems order by id", vec![])
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_statements_share_one_engine() {
        let (_dir, client) = fixture_client();
        let client = Arc::new(client);

        let mut handles = Vec::new();
        for id in 1..=8_i64 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                catalog::get_system_name(&client, id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.engine_initializations(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transfer_is_accounted_per_session() {
        let (_dir, client) = fixture_client();

        assert_eq!(client.total_bytes_read(), 0);
        catalog::get_systems(&client).await.unwrap();
        let after_first = client.total_bytes_read();
        assert!(after_first > 0);

        // A cache hit moves no further bytes
        catalog::get_systems(&client).await.unwrap();
        assert_eq!(client.total_bytes_read(), after_first);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn byte_budget_stops_runaway_sessions() {
        let (_dir, location) = fixture_database();
        let source = RemoteSource::new(&location).with_max_bytes(Some(1024));
        let client = QueryClient::new(source);

        // Opening alone reads the header page and the schema, which already
        // exceeds a 1 KiB ceiling
        let err = client
            .exec("select count(*) from codes", vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Reader(ReaderError::ByteBudgetExceeded { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn large_sorts_spill_to_memory_not_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.db");
        let conn = Connection::open(&path).unwrap();

        // Enough unsorted data that the sorter overflows its in-core
        // buffer; the spill must land in memory, since the read-only VFS
        // refuses temp-file opens.
        conn.execute_batch(
            "
            create table blobs (
                id integer primary key,
                payload text not null
            );
            with recursive seq(n) as (
                select 1 union all select n + 1 from seq where n < 40000
            )
            insert into blobs (id, payload)
            select n, hex(randomblob(150)) from seq;
            ",
        )
        .unwrap();
        drop(conn);

        let location = path.to_string_lossy().into_owned();
        let source = RemoteSource::new(&location).with_max_bytes(None);
        let client = QueryClient::new(source);

        let rows = client
            .exec("select id from blobs order by payload", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 40_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sql_errors_surface_as_engine_failures() {
        let (_dir, client) = fixture_client();

        let err = client
            .exec("select nope from missing_table", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Engine(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_database_fails_startup_but_not_the_client() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        let client = QueryClient::new(RemoteSource::new(missing.to_string_lossy().as_ref()));

        let err = client.exec("select 1", vec![]).await;
        assert!(err.is_err());

        // The failed startup is not sticky; the attempt counter keeps moving
        let again = client.exec("select 1", vec![]).await;
        assert!(again.is_err());
        assert_eq!(client.engine_initializations(), 2);
    }
}
