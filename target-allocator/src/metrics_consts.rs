/// Gauge for the number of collectors handed to the allocator
pub const COLLECTORS_DISCOVERED: &str = "target_allocator_collectors_discovered";

/// Gauge for the number of collectors the active strategy can assign to (label: strategy)
pub const COLLECTORS_ALLOCATABLE: &str = "target_allocator_collectors_allocatable";

/// Gauge for the number of targets left after filtering on the last `set_targets`
pub const TARGETS_DISCOVERED: &str = "target_allocator_targets_discovered";

/// Gauge for targets owned per collector (labels: collector_name, strategy)
pub const TARGETS_PER_COLLECTOR: &str = "target_allocator_targets_per_collector";

/// Gauge for targets currently without a collector
pub const TARGETS_UNASSIGNED: &str = "target_allocator_targets_unassigned";

/// Counter for targets a strategy (and its fallback) could not place (label: strategy)
pub const ASSIGNMENT_MISSES: &str = "target_allocator_assignment_misses_total";

/// Histogram for time spent recomputing assignments (label: method)
pub const TIME_TO_ASSIGN: &str = "target_allocator_time_to_assign_seconds";
