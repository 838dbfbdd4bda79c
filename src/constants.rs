/// 默认每日学习负载（分钟）
pub const DEFAULT_DAILY_LOAD_MINUTES: u32 = 30;

/// 默认每日最小负载（分钟）
pub const DEFAULT_MIN_DAILY_LOAD: u32 = 10;

/// 默认每日最大负载（分钟）
pub const DEFAULT_MAX_DAILY_LOAD: u32 = 120;

/// 每日学习负载的绝对上限（分钟）
pub const MAX_DAILY_MINUTES: u32 = 600;

/// 单次推荐生成的默认数量上限
pub const DEFAULT_RECOMMENDATION_CAP: usize = 10;

/// 事件队列默认容量
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// 重算失败的默认最大重试次数
pub const DEFAULT_RECOMPUTE_MAX_RETRIES: u32 = 3;

/// 指数退避基准（秒）
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 60;

/// 指数退避上限（秒）
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// 目标标题最大长度
pub const MAX_GOAL_TITLE_LEN: usize = 200;

/// 学习计划名称最大长度
pub const MAX_SCHEDULE_NAME_LEN: usize = 100;

/// 活动分配权重之和的容差
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// 日期键格式
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";
