// Esquema Diesel del inventario. Timestamps como epoch millis (BigInt),
// columnas JSON como Text. Las unicidades case-insensitive viven como
// índices únicos sobre lower(...) en las migraciones.
use diesel::allow_tables_to_appear_in_same_query;

diesel::table! {
    users (id) {
        id -> BigInt,
        username -> Text,
        email -> Text,
        is_superuser -> Bool,
    }
}
diesel::table! {
    organizations (id) {
        id -> BigInt,
        uuid -> Text,
        name -> Text,
        slug -> Text,
        created_by -> Nullable<BigInt>,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    research_databases (id) {
        id -> BigInt,
        organization_id -> BigInt,
        name -> Text,
        description -> Text,
        created_by -> Nullable<BigInt>,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    organization_memberships (id) {
        id -> BigInt,
        organization_id -> BigInt,
        user_id -> BigInt,
        role -> Text,
        joined_at_ts -> BigInt,
    }
}
diesel::table! {
    database_memberships (id) {
        id -> BigInt,
        research_database_id -> BigInt,
        user_id -> BigInt,
        role -> Text,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    organisms (id) {
        id -> BigInt,
        research_database_id -> BigInt,
        name -> Text,
    }
}
diesel::table! {
    locations (id) {
        id -> BigInt,
        research_database_id -> BigInt,
        building -> Text,
        room -> Text,
        freezer -> Text,
        box_label -> Text,
        position -> Text,
    }
}
diesel::table! {
    plasmids (id) {
        id -> BigInt,
        research_database_id -> BigInt,
        name -> Text,
        resistance_marker -> Text,
        notes -> Text,
    }
}
diesel::table! {
    strains (id) {
        id -> BigInt,
        research_database_id -> BigInt,
        strain_id -> Text,
        name -> Text,
        organism_id -> BigInt,
        genotype -> Text,
        selective_marker -> Text,
        comments -> Text,
        location_id -> BigInt,
        status -> Text,
        created_by -> Nullable<BigInt>,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
        is_active -> Bool,
        is_archived -> Bool,
        archived_at_ts -> Nullable<BigInt>,
        archived_by -> Nullable<BigInt>,
    }
}
diesel::table! {
    strain_plasmids (id) {
        id -> BigInt,
        strain_id -> BigInt,
        plasmid_id -> BigInt,
    }
}
diesel::table! {
    field_definitions (id) {
        id -> BigInt,
        research_database_id -> BigInt,
        organization_id -> BigInt,
        name -> Text,
        key -> Text,
        field_type -> Text,
        choices -> Text,
        default_value -> Text,
        help_text -> Text,
        validation_rules -> Text,
        is_unique -> Bool,
        conditional_logic -> Nullable<Text>,
        field_order -> Integer,
        group_name -> Nullable<Text>,
        group_order -> Integer,
        visible_to_roles -> Text,
        editable_to_roles -> Text,
        related_model -> Nullable<Text>,
        created_by -> Nullable<BigInt>,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    field_values (id) {
        id -> BigInt,
        strain_id -> BigInt,
        field_definition_id -> BigInt,
        value_text -> Nullable<Text>,
        value_long_text -> Nullable<Text>,
        value_integer -> Nullable<BigInt>,
        value_decimal -> Nullable<Text>,
        value_date -> Nullable<Text>,
        value_boolean -> Nullable<Bool>,
        value_single_select -> Nullable<Text>,
        value_multi_select -> Nullable<Text>,
        value_fk_kind -> Nullable<Text>,
        value_fk_id -> Nullable<BigInt>,
        value_file -> Nullable<Text>,
        value_url -> Nullable<Text>,
        value_email -> Nullable<Text>,
    }
}
diesel::table! {
    audit_logs (id) {
        id -> BigInt,
        database_id -> Nullable<BigInt>,
        user_id -> Nullable<BigInt>,
        action -> Text,
        object_type -> Text,
        object_id -> Nullable<Text>,
        metadata -> Text,
        timestamp_ts -> BigInt,
    }
}

allow_tables_to_appear_in_same_query!(users,
                                      organizations,
                                      research_databases,
                                      organization_memberships,
                                      database_memberships,
                                      organisms,
                                      locations,
                                      plasmids,
                                      strains,
                                      strain_plasmids,
                                      field_definitions,
                                      field_values,
                                      audit_logs);
