//! Fixed SQL used by the analysis reports.

/// Server identity, one row.
pub const SERVER_INFO: &str = "SELECT
    @@SERVERNAME AS ServerName,
    @@VERSION AS SqlVersion,
    DB_NAME() AS CurrentDatabase,
    SYSTEM_USER AS CurrentUser,
    GETDATE() AS CurrentTime,
    @@LANGUAGE AS LanguageSetting";

/// User databases, system databases excluded.
pub const LIST_DATABASES: &str = "SELECT
    name AS DatabaseName,
    database_id AS DatabaseId,
    create_date AS CreatedDate,
    collation_name AS Collation,
    state_desc AS State,
    compatibility_level AS CompatibilityLevel
FROM sys.databases
WHERE name NOT IN ('master', 'tempdb', 'model', 'msdb')
ORDER BY name";

/// Metadata row plus one text-valued count row per object kind.
///
/// Count rows carry their value in the second column, which the first
/// branch of the UNION names `DatabaseName`.
pub const ORCHESTRATION_ANALYSIS: &str = "SELECT
    'Database_Metadata' AS AnalysisType,
    DB_NAME() AS DatabaseName,
    SYSTEM_USER AS CurrentUser,
    @@SPID AS SessionId,
    GETDATE() AS AnalysisTime,
    @@VERSION AS SqlVersion
UNION ALL
SELECT 'Schema_Count', CAST(COUNT(DISTINCT SCHEMA_NAME) AS VARCHAR(50)), NULL, NULL, NULL, NULL
FROM INFORMATION_SCHEMA.SCHEMATA
WHERE SCHEMA_NAME NOT IN ('sys', 'INFORMATION_SCHEMA')
UNION ALL
SELECT 'Table_Count', CAST(COUNT(*) AS VARCHAR(50)), NULL, NULL, NULL, NULL
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_TYPE = 'BASE TABLE'
UNION ALL
SELECT 'View_Count', CAST(COUNT(*) AS VARCHAR(50)), NULL, NULL, NULL, NULL
FROM INFORMATION_SCHEMA.VIEWS
UNION ALL
SELECT 'Stored_Procedure_Count', CAST(COUNT(*) AS VARCHAR(50)), NULL, NULL, NULL, NULL
FROM INFORMATION_SCHEMA.ROUTINES
WHERE ROUTINE_TYPE = 'PROCEDURE'
UNION ALL
SELECT 'Function_Count', CAST(COUNT(*) AS VARCHAR(50)), NULL, NULL, NULL, NULL
FROM INFORMATION_SCHEMA.ROUTINES
WHERE ROUTINE_TYPE = 'FUNCTION'
ORDER BY AnalysisType";

/// Tables of the schema bound to `:schema`, with column counts.
pub const TABLE_INVENTORY: &str = "SELECT
    t.TABLE_SCHEMA AS SchemaName,
    t.TABLE_NAME AS TableName,
    t.TABLE_TYPE AS TableType,
    c.COLUMN_COUNT AS ColumnCount
FROM INFORMATION_SCHEMA.TABLES t
LEFT JOIN (
    SELECT TABLE_SCHEMA, TABLE_NAME, COUNT(*) AS COLUMN_COUNT
    FROM INFORMATION_SCHEMA.COLUMNS
    GROUP BY TABLE_SCHEMA, TABLE_NAME
) c ON t.TABLE_SCHEMA = c.TABLE_SCHEMA AND t.TABLE_NAME = c.TABLE_NAME
WHERE t.TABLE_SCHEMA = :schema
ORDER BY t.TABLE_NAME";

/// Session, request and online database counts, one row.
pub const PERFORMANCE_SNAPSHOT: &str = "SELECT
    (SELECT COUNT(*) FROM sys.dm_exec_sessions WHERE is_user_process = 1) AS ActiveSessions,
    (SELECT COUNT(*) FROM sys.dm_exec_requests) AS ActiveRequests,
    (SELECT COUNT(*) FROM sys.databases WHERE state_desc = 'ONLINE') AS OnlineDatabases";
