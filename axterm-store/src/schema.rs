pub const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS packets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        \"from\" TEXT NOT NULL,
        \"to\" TEXT NOT NULL,
        via_json TEXT NOT NULL,
        frame_type TEXT NOT NULL,
        control INTEGER NOT NULL,
        pid INTEGER,
        info_blob BLOB NOT NULL,
        raw_blob BLOB NOT NULL,
        endpoint TEXT NOT NULL,
        pinned INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_packets_timestamp ON packets(timestamp);
    CREATE INDEX IF NOT EXISTS idx_packets_pinned ON packets(pinned);

    CREATE TABLE IF NOT EXISTS console (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at INTEGER NOT NULL,
        level TEXT NOT NULL,
        category TEXT NOT NULL,
        message TEXT NOT NULL,
        packet_id INTEGER,
        metadata_json TEXT,
        byte_count INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_console_created_at ON console(created_at);

    CREATE TABLE IF NOT EXISTS raw (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at INTEGER NOT NULL,
        source TEXT NOT NULL,
        direction TEXT NOT NULL,
        kind TEXT NOT NULL,
        raw_hex TEXT NOT NULL,
        byte_count INTEGER NOT NULL,
        packet_id INTEGER,
        metadata_json TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_raw_created_at ON raw(created_at);

    CREATE TABLE IF NOT EXISTS neighbors (
        call TEXT PRIMARY KEY,
        quality INTEGER NOT NULL,
        last_seen INTEGER NOT NULL,
        source TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS routes (
        destination TEXT PRIMARY KEY,
        origin TEXT NOT NULL,
        quality INTEGER NOT NULL,
        hop_count INTEGER NOT NULL,
        last_updated INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS link_stats (
        \"from\" TEXT NOT NULL,
        \"to\" TEXT NOT NULL,
        quality INTEGER NOT NULL,
        last_updated INTEGER NOT NULL,
        observed INTEGER NOT NULL,
        dropped INTEGER NOT NULL,
        PRIMARY KEY (\"from\", \"to\")
    );

    CREATE TABLE IF NOT EXISTS snapshot_meta (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        last_packet_id INTEGER NOT NULL,
        config_hash INTEGER NOT NULL,
        snapshot_timestamp INTEGER NOT NULL
    );
";
